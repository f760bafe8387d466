//! Rule-based task analysis: split a free-text task into clauses and name
//! each one. Works the same whether or not a model is loaded.

use std::sync::OnceLock;

use regex::Regex;

use crate::types::{Capability, Subtask, TaskAnalysis, TaskType};

struct Rule {
    name: &'static str,
    pattern: &'static str,
    caps: &'static [Capability],
    steps: usize,
}

/// First matching rule names the clause. Order matters: "close" must win over
/// "open", and navigation over plain text entry.
const RULES: &[Rule] = &[
    Rule {
        name: "close_application",
        pattern: r"(?i)\b(close|quit|exit|kill|terminate)\b|关闭|退出",
        caps: &[Capability::Process],
        steps: 1,
    },
    Rule {
        name: "navigate_to_page",
        pattern: r"(?i)\b(go to|goto|visit|navigate|browse|open url)\b|https?://|www\.|\.(com|org|net|io)\b|访问|前往|打开网页|网址",
        caps: &[Capability::Pointer, Capability::Keyboard],
        steps: 3,
    },
    Rule {
        name: "open_application",
        pattern: r"(?i)\b(open|launch|start|run)\b|打开|启动|运行",
        caps: &[Capability::Process],
        steps: 1,
    },
    Rule {
        name: "enter_text",
        pattern: r"(?i)\b(type|input|write|search|fill|enter text|send)\b|输入|搜索|填写|发送",
        caps: &[Capability::Pointer, Capability::Keyboard],
        steps: 2,
    },
    Rule {
        name: "manipulate_view",
        pattern: r"(?i)\b(scroll|drag|zoom|swipe|resize)\b|滚动|拖动|拖拽|缩放",
        caps: &[Capability::Pointer],
        steps: 1,
    },
    Rule {
        name: "press_keys",
        pattern: r"(?i)\b(press|hotkey|shortcut)\b|按下|快捷键",
        caps: &[Capability::Keyboard],
        steps: 1,
    },
];

const FALLBACK: &str = "perform_action";

fn clause_splitter() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\s*(?:[,;，；。]|\bthen\b|\band\b|然后|并且|并|再)\s*").expect("clause pattern")
    })
}

fn rules() -> &'static [(Regex, &'static Rule)] {
    static COMPILED: OnceLock<Vec<(Regex, &'static Rule)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        RULES
            .iter()
            .map(|r| (Regex::new(r.pattern).expect("rule pattern"), r))
            .collect()
    })
}

/// Classify a single clause; unmatched clauses are generic pointer actions.
fn classify(clause: &str) -> (&'static str, &'static [Capability], usize) {
    rules()
        .iter()
        .find(|(re, _)| re.is_match(clause))
        .map(|(_, r)| (r.name, r.caps, r.steps))
        .unwrap_or((FALLBACK, &[Capability::Pointer], 1))
}

fn task_type(subtasks: &[Subtask]) -> TaskType {
    let has = |name: &str| subtasks.iter().any(|s| s.name == name);
    if has("navigate_to_page") {
        TaskType::Navigation
    } else if has("enter_text") {
        TaskType::TextEntry
    } else if has("open_application") || has("close_application") {
        TaskType::ApplicationControl
    } else if subtasks.is_empty() {
        TaskType::General
    } else {
        TaskType::Interaction
    }
}

pub fn analyze(description: &str) -> TaskAnalysis {
    let mut subtasks = Vec::new();
    let mut caps = Vec::new();
    let mut steps = 0;

    for clause in clause_splitter().split(description) {
        let clause = clause.trim();
        if clause.is_empty() {
            continue;
        }
        let (name, c, n) = classify(clause);
        subtasks.push(Subtask { name: name.to_string(), text: clause.to_string() });
        caps.extend_from_slice(c);
        steps += n;
    }
    caps.sort();
    caps.dedup();

    TaskAnalysis {
        task_type: task_type(&subtasks),
        subtasks,
        required_capabilities: caps,
        estimated_steps: steps,
    }
}
