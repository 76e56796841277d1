use codeclaw_storage::{Message, RedactedSession, Role, Session, TrajectoryLabel};

/// User phrasing that pushes back on the previous assistant turn
const CORRECTION_PHRASES: &[&str] = &[
    "wrong",
    "that's not",
    "that is not",
    "doesn't work",
    "does not work",
    "didn't work",
    "broken",
    "incorrect",
    "not what i",
    "that won't",
    "not right",
    "regression",
    "still failing",
];

const ERROR_PHRASES: &[&str] = &[
    "error",
    "traceback",
    "exception",
    "panicked",
    "failed",
    "failing",
    "stack trace",
    "segfault",
    "non-zero exit",
];

const ROOT_CAUSE_PHRASES: &[&str] = &[
    "root cause",
    "the issue is",
    "the issue was",
    "caused by",
    "the problem is",
    "the problem was",
    "the bug is",
    "the bug was",
    "turns out",
];

const REFACTOR_PHRASES: &[&str] = &[
    "refactor",
    "simplify",
    "clean up",
    "cleanup",
    "extract",
    "restructure",
    "reorganize",
    "consolidate",
    "deduplicate",
    "tech debt",
];

/// Tool names (or prefixes) that run commands
const EXEC_TOOLS: &[&str] = &[
    "bash", "shell", "exec", "terminal", "python", "pytest", "cargo", "npm", "run_command",
];

/// Tool names (or prefixes) that change files
const EDIT_TOOLS: &[&str] = &[
    "edit",
    "multiedit",
    "write",
    "str_replace",
    "apply_patch",
    "create_file",
    "notebookedit",
];

const ITERATIVE_MIN_MESSAGES: usize = 8;
const ITERATIVE_MIN_TOOL_TURNS: usize = 3;

fn mentions_any(text: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| text.contains(p))
}

fn tool_matches(name: &str, tools: &[&str]) -> bool {
    let name = name.to_lowercase();
    tools.iter().any(|t| name.starts_with(t))
}

/// Per-message facts the predicates look at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnSignals {
    pub role: Option<Role>,
    pub correction: bool,
    pub error_output: bool,
    pub root_cause: bool,
    pub refactor_language: bool,
    pub exec_tool: bool,
    pub edit_tool: bool,
    pub tool_uses: usize,
}

impl TurnSignals {
    fn from_message(message: &Message) -> Self {
        let mut text = message.text().to_lowercase();
        if let Some(thinking) = &message.thinking {
            text.push('\n');
            text.push_str(&thinking.to_lowercase());
        }
        // Curly apostrophes show up in pasted text
        let text = text.replace('\u{2019}', "'");
        let is_user = message.role == Role::User;

        Self {
            role: Some(message.role),
            correction: is_user && mentions_any(&text, CORRECTION_PHRASES),
            error_output: mentions_any(&text, ERROR_PHRASES),
            root_cause: !is_user && mentions_any(&text, ROOT_CAUSE_PHRASES),
            refactor_language: mentions_any(&text, REFACTOR_PHRASES),
            exec_tool: message.tool_uses.iter().any(|t| tool_matches(&t.tool, EXEC_TOOLS)),
            edit_tool: message.tool_uses.iter().any(|t| tool_matches(&t.tool, EDIT_TOOLS)),
            tool_uses: message.tool_uses.len(),
        }
    }

    fn is_assistant(&self) -> bool {
        self.role == Some(Role::Assistant)
    }
}

/// Precomputed view of a session, shared by every predicate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSignals {
    pub turns: Vec<TurnSignals>,
}

impl SessionSignals {
    #[must_use]
    pub fn from_session(session: &Session) -> Self {
        Self {
            turns: session.messages.iter().map(TurnSignals::from_message).collect(),
        }
    }

    /// Indices of corrective user turns that answer an earlier assistant turn
    fn corrections(&self) -> impl Iterator<Item = usize> + '_ {
        let first_assistant = self.turns.iter().position(TurnSignals::is_assistant);
        self.turns
            .iter()
            .enumerate()
            .filter(move |(idx, turn)| {
                turn.correction && first_assistant.is_some_and(|first| first < *idx)
            })
            .map(|(idx, _)| idx)
    }

    fn assistant_after(&self, idx: usize) -> bool {
        self.turns.iter().skip(idx + 1).any(TurnSignals::is_assistant)
    }

    fn has_edit_tools(&self) -> bool {
        self.turns.iter().any(|t| t.edit_tool)
    }
}

fn is_correction_loop(signals: &SessionSignals) -> bool {
    signals
        .corrections()
        .last()
        .is_some_and(|last| signals.assistant_after(last))
}

fn is_debugging_trace(signals: &SessionSignals) -> bool {
    let turns = &signals.turns;
    let Some(exec) = turns.iter().position(|t| t.exec_tool) else {
        return false;
    };
    let Some(error) = turns
        .iter()
        .enumerate()
        .skip(exec + 1)
        .find(|(_, t)| t.error_output)
        .map(|(idx, _)| idx)
    else {
        return false;
    };
    // The diagnosis must come in a later turn than the error it explains
    turns
        .iter()
        .skip(error + 1)
        .any(|t| t.is_assistant() && t.root_cause)
}

fn is_iterative_build(signals: &SessionSignals) -> bool {
    let tool_turns = signals
        .turns
        .iter()
        .filter(|t| t.is_assistant() && t.tool_uses > 0)
        .count();
    signals.turns.len() >= ITERATIVE_MIN_MESSAGES
        && tool_turns >= ITERATIVE_MIN_TOOL_TURNS
        && signals.has_edit_tools()
}

fn is_refactor(signals: &SessionSignals) -> bool {
    let first_prompt = signals
        .turns
        .iter()
        .find(|t| t.role == Some(Role::User))
        .is_some_and(|t| t.refactor_language);
    let assistant_reasoning = signals
        .turns
        .iter()
        .any(|t| t.is_assistant() && t.refactor_language);

    signals.has_edit_tools()
        && (first_prompt || assistant_reasoning)
        && signals.corrections().next().is_none()
}

type Predicate = fn(&SessionSignals) -> bool;

/// Evaluated in order, first match wins. Anything unmatched is a clean first try.
const RULES: &[(TrajectoryLabel, Predicate)] = &[
    (TrajectoryLabel::CorrectionLoop, is_correction_loop),
    (TrajectoryLabel::DebuggingTrace, is_debugging_trace),
    (TrajectoryLabel::IterativeBuild, is_iterative_build),
    (TrajectoryLabel::Refactor, is_refactor),
];

/// Assigns each redacted session exactly one trajectory label
#[derive(Debug, Clone, Copy, Default)]
pub struct TrajectoryClassifier;

impl TrajectoryClassifier {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn classify(&self, session: &RedactedSession) -> TrajectoryLabel {
        Self::classify_signals(&SessionSignals::from_session(session.session()))
    }

    #[must_use]
    pub fn classify_signals(signals: &SessionSignals) -> TrajectoryLabel {
        let label = RULES
            .iter()
            .find(|(_, matches)| matches(signals))
            .map_or(TrajectoryLabel::CleanFirstTry, |(label, _)| *label);
        log::debug!("Classified {} turns as {label}", signals.turns.len());
        label
    }

    /// Labels in the order they are tried, ending with the fallback
    #[must_use]
    pub fn priority() -> Vec<TrajectoryLabel> {
        RULES
            .iter()
            .map(|(label, _)| *label)
            .chain(std::iter::once(TrajectoryLabel::CleanFirstTry))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(messages: Vec<Message>) -> TrajectoryLabel {
        let session = Session::new("s", "claude", "demo", messages);
        let redacted = RedactedSession::new(session, Vec::new(), Vec::new(), 3);
        TrajectoryClassifier::new().classify(&redacted)
    }

    fn signals(messages: Vec<Message>) -> SessionSignals {
        SessionSignals::from_session(&Session::new("s", "claude", "demo", messages))
    }

    #[test]
    fn test_priority_order() {
        assert_eq!(
            TrajectoryClassifier::priority(),
            vec![
                TrajectoryLabel::CorrectionLoop,
                TrajectoryLabel::DebuggingTrace,
                TrajectoryLabel::IterativeBuild,
                TrajectoryLabel::Refactor,
                TrajectoryLabel::CleanFirstTry,
            ]
        );
    }

    #[test]
    fn test_clean_first_try_fallback() {
        let label = classify(vec![
            Message::user("add a greeting function"),
            Message::assistant("Added it.").with_tool_use("Edit", "{}"),
            Message::user("thanks"),
        ]);
        assert_eq!(label, TrajectoryLabel::CleanFirstTry);
    }

    #[test]
    fn test_correction_beats_clean() {
        // Ends in success like a clean run, but a correction happened on the way
        let label = classify(vec![
            Message::user("add a greeting function"),
            Message::assistant("Added greet().").with_tool_use("Edit", "{}"),
            Message::user("That's wrong, it should take a name"),
            Message::assistant("Updated greet(name).").with_tool_use("Edit", "{}"),
            Message::user("great, thanks"),
        ]);
        assert_eq!(label, TrajectoryLabel::CorrectionLoop);
    }

    #[test]
    fn test_correction_needs_a_follow_up() {
        let turns = signals(vec![
            Message::user("add a greeting function"),
            Message::assistant("Added greet()."),
            Message::user("this doesn't work"),
        ]);
        assert!(!is_correction_loop(&turns));

        // Complaints before the assistant ever answered are not corrections
        let turns = signals(vec![
            Message::user("the build is broken, help"),
            Message::assistant("Fixed the import."),
        ]);
        assert!(!is_correction_loop(&turns));
    }

    #[test]
    fn test_debugging_trace() {
        let label = classify(vec![
            Message::user("the tests are red"),
            Message::assistant("Running them.").with_tool_use("Bash", "cargo test"),
            Message::user("thread 'main' panicked at src/lib.rs"),
            Message::assistant("The root cause is an off-by-one in the parser."),
        ]);
        assert_eq!(label, TrajectoryLabel::DebuggingTrace);
    }

    #[test]
    fn test_debugging_trace_requires_order() {
        // Diagnosis before any command ran
        let turns = signals(vec![
            Message::assistant("The issue is the config path."),
            Message::assistant("Checking.").with_tool_use("Bash", "ls"),
            Message::user("error: no such file"),
        ]);
        assert!(!is_debugging_trace(&turns));

        // Error output and diagnosis in the same message do not count
        let turns = signals(vec![
            Message::assistant("Running it.").with_tool_use("Bash", "cargo test"),
            Message::assistant("error: test failed. The root cause is a stale fixture."),
        ]);
        assert!(!is_debugging_trace(&turns));

        let turns = signals(vec![
            Message::assistant("Running it.").with_tool_use("Bash", "cargo test"),
            Message::assistant("error: test failed, looking into it."),
            Message::assistant("The root cause is a stale fixture."),
        ]);
        assert!(is_debugging_trace(&turns));
    }

    #[test]
    fn test_iterative_build() {
        let mut messages = vec![Message::user("build a todo CLI")];
        for step in 0..4 {
            messages.push(
                Message::assistant(format!("Step {step} done.")).with_tool_use("Write", "{}"),
            );
            messages.push(Message::user("next"));
        }
        assert_eq!(messages.len(), 9);
        assert_eq!(classify(messages), TrajectoryLabel::IterativeBuild);
    }

    #[test]
    fn test_short_build_is_not_iterative() {
        let turns = signals(vec![
            Message::user("build it"),
            Message::assistant("ok").with_tool_use("Write", "{}"),
            Message::assistant("ok").with_tool_use("Write", "{}"),
            Message::assistant("ok").with_tool_use("Write", "{}"),
        ]);
        assert!(!is_iterative_build(&turns));
    }

    #[test]
    fn test_refactor() {
        let label = classify(vec![
            Message::user("Please refactor the config loader"),
            Message::assistant("Extracted the parsing into its own function.")
                .with_tool_use("Edit", "{}"),
        ]);
        assert_eq!(label, TrajectoryLabel::Refactor);
    }

    #[test]
    fn test_refactor_needs_edits_and_no_correction() {
        let no_edits = signals(vec![
            Message::user("how would you refactor this?"),
            Message::assistant("I would extract a helper."),
        ]);
        assert!(!is_refactor(&no_edits));

        let corrected = signals(vec![
            Message::user("refactor the loader"),
            Message::assistant("Done.").with_tool_use("Edit", "{}"),
            Message::user("that's not what I asked for"),
        ]);
        assert!(!is_refactor(&corrected));
    }
}
