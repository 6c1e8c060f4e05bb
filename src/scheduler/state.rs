use std::fmt;

/// Where the fragment scheduler stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum State {
    #[default]
    Stopped,
    Starting,
    Idle,
    Paused,
    KeyLoading,
    FragLoading,
    FragLoadingWaitingRetry,
    WaitingLevel,
    Parsing,
    Parsed,
    Ended,
    Error,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Stopped => "STOPPED",
            State::Starting => "STARTING",
            State::Idle => "IDLE",
            State::Paused => "PAUSED",
            State::KeyLoading => "KEY_LOADING",
            State::FragLoading => "FRAG_LOADING",
            State::FragLoadingWaitingRetry => "FRAG_LOADING_WAITING_RETRY",
            State::WaitingLevel => "WAITING_LEVEL",
            State::Parsing => "PARSING",
            State::Parsed => "PARSED",
            State::Ended => "ENDED",
            State::Error => "ERROR",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
