use chrono::{DateTime, SecondsFormat, Utc};

/// Default orchestrator instructions. `{system_time}` is filled at every oracle invocation.
pub const TRAVEL_SYSTEM_PROMPT: &str = "\
You coordinate travel planning across specialist agents. Work out what the traveller needs, \
delegate each part to the right specialist and combine their answers into one plan.

Specialists:
- flight agent: flight search and schedules
- hotel agent: accommodation search
- eSIM agent: mobile data plans for the destination
- activities agent: tours, attractions and experiences

Start with analyze_travel_request to see which services the request involves, then call the \
matching delegate_to_* capabilities. When a specialist fails or a detail is missing, say so \
and ask the traveller for it instead of guessing.

System time: {system_time}";

const TIME_PLACEHOLDER: &str = "{system_time}";

/// Source of wall-clock time for prompt rendering.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Clone, Debug)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn travel() -> Self {
        Self::new(TRAVEL_SYSTEM_PROMPT)
    }

    /// Substitute every `{system_time}` with `now` in RFC 3339.
    pub fn render(&self, now: DateTime<Utc>) -> String {
        self.template
            .replace(TIME_PLACEHOLDER, &now.to_rfc3339_opts(SecondsFormat::Secs, false))
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::travel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FixedClock;

    #[test]
    fn renders_time() {
        let rendered = PromptTemplate::travel().render(FixedClock::new().now());
        assert!(rendered.ends_with("System time: 2026-01-05T10:00:00+00:00"));
        assert!(!rendered.contains(TIME_PLACEHOLDER));
    }

    #[test]
    fn template_without_placeholder_unchanged() {
        let prompt = PromptTemplate::new("be brief");
        assert_eq!(prompt.render(Utc::now()), "be brief");
    }

    #[test]
    fn system_clock_moves() {
        let a = SystemClock.now();
        let b = SystemClock.now();
        assert!(b >= a);
    }
}
