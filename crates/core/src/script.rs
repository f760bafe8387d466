use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow, bail};
use mlua::prelude::*;
use mlua::IntoLuaMulti;

use crate::config::EngineConfig;
use crate::decision::Model;
use crate::logger;
use crate::sleep;
use crate::types::*;

/// A capture exposed to Lua as read-only userdata.
struct LuaScreen(ScreenState);

impl LuaUserData for LuaScreen {
    fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("width", |_, this, ()| Ok(this.0.width()));
        methods.add_method("height", |_, this, ()| Ok(this.0.height()));

        methods.add_method("pixel", |_, this, (x, y): (u32, u32)| {
            let [r, g, b] = this.0.pixel(x, y).ok_or_else(|| {
                LuaError::RuntimeError(format!(
                    "pixel ({}, {}) outside {}x{} capture",
                    x,
                    y,
                    this.0.width(),
                    this.0.height()
                ))
            })?;
            Ok((r, g, b))
        });

        // left, top, width, height of a region capture; nil for full screen
        methods.add_method("region", |lua, this, ()| match this.0.region() {
            Some(r) => (r.left, r.top, r.width, r.height).into_lua_multi(lua),
            None => LuaNil.into_lua_multi(lua),
        });
    }
}

struct ScriptVm {
    lua: Lua,
    key: LuaRegistryKey,
}

/// Decision model implemented by a Lua script.
///
/// The script returns a table with `decide(task, screen, config)` and/or
/// `plan(task, history, config)`, plus optional `load(config)` and `unload()`.
pub struct ScriptModel {
    default_path: Option<PathBuf>,
    vm: Option<ScriptVm>,
}

fn lua_err(e: mlua::Error) -> anyhow::Error {
    anyhow!("{}", e)
}

impl ScriptModel {
    /// `path` is used when `load` is called without one.
    pub fn new(path: Option<PathBuf>) -> Self {
        logger::register_prefix("script", logger::COLOR_BLUE);
        Self { default_path: path, vm: None }
    }

    fn vm(&self) -> Result<&ScriptVm> {
        self.vm.as_ref().ok_or_else(|| anyhow!("script not loaded"))
    }

    fn function(&self, name: &str) -> Result<(&Lua, Option<LuaFunction>)> {
        let vm = self.vm()?;
        let table: LuaTable = vm.lua.registry_value(&vm.key).map_err(lua_err)?;
        let f = table.get::<Option<LuaFunction>>(name).map_err(lua_err)?;
        Ok((&vm.lua, f))
    }
}

impl Model for ScriptModel {
    fn name(&self) -> &str {
        "script"
    }

    fn load(&mut self, path: Option<&Path>, config: &EngineConfig) -> Result<()> {
        let path = match path.or(self.default_path.as_deref()) {
            Some(p) => p.to_path_buf(),
            None => bail!("no script path given"),
        };

        let lua = Lua::new();
        register_globals(&lua).map_err(lua_err)?;

        // let require() find modules next to the script
        if let Some(dir) = path.parent() {
            let dir = dir.to_string_lossy();
            let pkg: LuaTable = lua.globals().get("package").map_err(lua_err)?;
            pkg.set("path", format!("{}/?.lua;{}/?/init.lua", dir, dir)).map_err(lua_err)?;
        }

        let code = std::fs::read_to_string(&path).map_err(|e| anyhow!("{}: {}", path.display(), e))?;
        let table: LuaTable = lua
            .load(&code)
            .set_name(path.to_string_lossy())
            .eval()
            .map_err(lua_err)?;

        let has_decide = table.get::<Option<LuaFunction>>("decide").map_err(lua_err)?.is_some();
        let has_plan = table.get::<Option<LuaFunction>>("plan").map_err(lua_err)?.is_some();
        if !has_decide && !has_plan {
            bail!("{} defines neither decide() nor plan()", path.display());
        }

        if let Some(f) = table.get::<Option<LuaFunction>>("load").map_err(lua_err)? {
            let cfg = lua.to_value(config).map_err(lua_err)?;
            f.call::<()>(cfg).map_err(lua_err)?;
        }

        let key = lua.create_registry_value(table).map_err(lua_err)?;
        self.vm = Some(ScriptVm { lua, key });
        logger::info_p("script", &format!("loaded {}", path.display()));
        Ok(())
    }

    fn unload(&mut self) {
        match self.function("unload") {
            Ok((_, Some(f))) => {
                if let Err(e) = f.call::<()>(()) {
                    logger::warn_p("script", &format!("unload(): {}", e));
                }
            }
            Ok((_, None)) | Err(_) => {}
        }
        self.vm = None;
    }

    fn decide(&mut self, screen: Option<&ScreenState>, task: &str, config: &EngineConfig) -> Result<Decision> {
        let (lua, f) = self.function("decide")?;
        let f = f.ok_or_else(|| anyhow!("script has no decide()"))?;
        let screen = match screen {
            Some(s) => LuaValue::UserData(lua.create_userdata(LuaScreen(s.clone())).map_err(lua_err)?),
            None => LuaNil,
        };
        let cfg = lua.to_value(config).map_err(lua_err)?;
        let out: LuaValue = f.call((task, screen, cfg)).map_err(lua_err)?;
        lua.from_value(out).map_err(|e| anyhow!("decide() returned an unusable value: {}", e))
    }

    fn plan(&mut self, task: &str, history: &[ScreenState], config: &EngineConfig) -> Result<ActionSequence> {
        let (lua, f) = self.function("plan")?;
        let f = f.ok_or_else(|| anyhow!("script has no plan()"))?;
        let list = lua.create_table().map_err(lua_err)?;
        for s in history {
            list.push(LuaScreen(s.clone())).map_err(lua_err)?;
        }
        let cfg = lua.to_value(config).map_err(lua_err)?;
        let out: LuaValue = f.call((task, list, cfg)).map_err(lua_err)?;
        lua.from_value(out).map_err(|e| anyhow!("plan() returned an unusable value: {}", e))
    }
}

/// Register the A.* global table into a Lua state.
fn register_globals(lua: &Lua) -> mlua::Result<()> {
    let a = lua.create_table()?;

    // A.sleep(seconds)
    let sleep_fn = lua.create_function(|_, secs: f64| {
        if !(0.0..=sleep::MAX_SECS).contains(&secs) {
            return Err(LuaError::RuntimeError(format!(
                "A.sleep: {} is not between 0 and {} seconds",
                secs,
                sleep::MAX_SECS
            )));
        }
        sleep::sleep_jitter(secs);
        Ok(())
    })?;
    a.set("sleep", sleep_fn)?;

    // A.log(msg)
    let log_fn = lua.create_function(|_, msg: String| {
        logger::info_p("script", &msg);
        Ok(())
    })?;
    a.set("log", log_fn)?;

    lua.globals().set("A", a)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::DecisionSource;
    use image::RgbImage;

    const SCRIPT: &str = r#"
local M = {}
local model_type = "?"

function M.load(config)
  model_type = config.model_type
end

function M.decide(task, screen, config)
  local r, g, b = screen:pixel(0, 0)
  A.log("corner is " .. r .. "," .. g .. "," .. b)
  return {
    kind = "click",
    x = screen:width() // 2,
    y = screen:height() // 2,
    confidence = 0.5,
    rationale = task .. " via " .. model_type,
  }
end

function M.plan(task, history, config)
  local steps = {}
  for _, s in ipairs(history) do
    local l, t = s:region()
    steps[#steps + 1] = { kind = "move", x = l or 0, y = t or 0, confidence = 1 }
  end
  steps[#steps + 1] = { kind = "hotkey", keys = { "ctrl", "s" }, confidence = 0.8 }
  return steps
end

return M
"#;

    fn write_script(dir: &Path, name: &str, code: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, code).unwrap();
        path
    }

    fn screen(w: u32, h: u32, region: Option<Rect>) -> ScreenState {
        ScreenState::new(RgbImage::from_pixel(w, h, image::Rgb([1, 2, 3])), region)
    }

    #[test]
    fn test_script_decides() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(dir.path(), "model.lua", SCRIPT);
        let mut source = DecisionSource::new(Box::new(ScriptModel::new(Some(path))));
        assert!(source.load(None));

        let d = source.decide(Some(&screen(40, 20, None)), "save").unwrap();
        assert_eq!(
            d.action,
            IntendedAction::Click { x: Some(20), y: Some(10), button: MouseButton::Left, clicks: 1, interval: 0.2 }
        );
        assert_eq!(d.confidence, 0.5);
        assert_eq!(d.rationale, "save via gelab-zero-4b-preview");
    }

    #[test]
    fn test_script_plans_from_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(dir.path(), "model.lua", SCRIPT);
        let mut source = DecisionSource::new(Box::new(ScriptModel::new(None)));
        assert!(source.load(Some(&path)));

        let history = [screen(4, 4, Some(Rect::new(7, 9, 4, 4))), screen(4, 4, None)];
        let plan = source.plan_sequence("save", Some(&history)).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].action, IntendedAction::Move { x: 7, y: 9, duration: 0.2 });
        assert_eq!(plan[1].action, IntendedAction::Move { x: 0, y: 0, duration: 0.2 });
        assert_eq!(plan[2].action, IntendedAction::Hotkey { keys: vec!["ctrl".into(), "s".into()] });
        assert_eq!(plan[2].confidence, 0.8);
    }

    #[test]
    fn test_decide_without_screen_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(dir.path(), "model.lua", SCRIPT);
        let mut source = DecisionSource::new(Box::new(ScriptModel::new(Some(path))));
        assert!(source.load(None));
        // the script indexes a nil screen
        assert_eq!(source.try_decide(None, "x").unwrap_err().code(), "model");
    }

    #[test]
    fn test_script_without_entry_points_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(dir.path(), "empty.lua", "return { unload = function() end }");
        let mut source = DecisionSource::new(Box::new(ScriptModel::new(Some(path))));
        let err = source.try_load(None).unwrap_err();
        assert!(err.to_string().contains("neither decide() nor plan()"));
        assert!(!source.is_loaded());
    }

    #[test]
    fn test_missing_script_and_no_path() {
        let mut source = DecisionSource::new(Box::new(ScriptModel::new(None)));
        assert!(!source.load(None));
        assert!(!source.load(Some(Path::new("/no/such/model.lua"))));
    }

    #[test]
    fn test_bad_output_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let code = r#"return {
            decide = function() return { kind = "warp", confidence = 0.5 } end,
            plan = function() return { { kind = "click", confidence = 3 } } end,
        }"#;
        let path = write_script(dir.path(), "bad.lua", code);
        let mut source = DecisionSource::new(Box::new(ScriptModel::new(Some(path))));
        assert!(source.load(None));
        assert_eq!(source.try_decide(None, "x").unwrap_err().code(), "model");
        assert_eq!(source.try_plan_sequence("x", None).unwrap_err().code(), "invalid_output");
    }

    #[test]
    fn test_sleep_rejects_unusable_durations() {
        let dir = tempfile::tempdir().unwrap();
        let code = r#"return {
            plan = function(task)
              if task == "forever" then A.sleep(1/0) else A.sleep(0/0) end
              return {}
            end,
        }"#;
        let path = write_script(dir.path(), "sleepy.lua", code);
        let mut source = DecisionSource::new(Box::new(ScriptModel::new(Some(path))));
        assert!(source.load(None));
        assert_eq!(source.try_plan_sequence("forever", None).unwrap_err().code(), "model");
        assert!(source.plan_sequence("nan", None).is_none());
    }

    #[test]
    fn test_require_finds_sibling_modules() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "helpers.lua", "return { conf = 0.25 }");
        let code = r#"local h = require("helpers")
            return { plan = function() return { { kind = "right_click", confidence = h.conf } } end }"#;
        let path = write_script(dir.path(), "main.lua", code);
        let mut source = DecisionSource::new(Box::new(ScriptModel::new(Some(path))));
        assert!(source.load(None));
        let plan = source.plan_sequence("x", None).unwrap();
        assert_eq!(plan[0].confidence, 0.25);
        assert!(source.unload());
    }
}
