//! Per-request state machine:
//! Start → CacheCheck → CacheHit → Respond
//!                    → CacheMiss → Invoke → InvokeOk → Store → Respond
//!                                         → InvokeFail → ErrorRespond

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestPhase {
    Start,
    CacheCheck,
    CacheHit,
    CacheMiss,
    Invoke,
    InvokeOk,
    InvokeFail,
    Store,
    Respond,
    ErrorRespond,
}

impl std::fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RequestPhase::Start => "Start",
            RequestPhase::CacheCheck => "CacheCheck",
            RequestPhase::CacheHit => "CacheHit",
            RequestPhase::CacheMiss => "CacheMiss",
            RequestPhase::Invoke => "Invoke",
            RequestPhase::InvokeOk => "InvokeOk",
            RequestPhase::InvokeFail => "InvokeFail",
            RequestPhase::Store => "Store",
            RequestPhase::Respond => "Respond",
            RequestPhase::ErrorRespond => "ErrorRespond",
        };
        f.write_str(name)
    }
}

impl RequestPhase {
    pub fn can_transition_to(self, next: RequestPhase) -> bool {
        use RequestPhase::*;
        matches!(
            (self, next),
            (Start, CacheCheck)
                | (CacheCheck, CacheHit)
                | (CacheCheck, CacheMiss)
                | (CacheHit, Respond)
                | (CacheMiss, Invoke)
                | (Invoke, InvokeOk)
                | (Invoke, InvokeFail)
                | (InvokeOk, Store)
                | (Store, Respond)
                | (InvokeFail, ErrorRespond)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestPhase::Respond | RequestPhase::ErrorRespond)
    }
}

/// Tracks one request's path through the phases.
#[derive(Debug)]
pub struct RequestFlow {
    current: RequestPhase,
    path: Vec<RequestPhase>,
}

impl RequestFlow {
    pub fn start() -> Self {
        Self {
            current: RequestPhase::Start,
            path: vec![RequestPhase::Start],
        }
    }

    pub fn current(&self) -> RequestPhase {
        self.current
    }

    pub fn path(&self) -> &[RequestPhase] {
        &self.path
    }

    /// Move to `next`. Invalid transitions are logged and still applied.
    pub fn advance(&mut self, next: RequestPhase) {
        if !self.current.can_transition_to(next) {
            warn!(from = %self.current, to = %next, "invalid request phase transition");
            debug_assert!(false, "invalid transition {} -> {}", self.current, next);
        }
        debug!(from = %self.current, to = %next, "request_phase");
        self.current = next;
        self.path.push(next);
    }
}

#[cfg(test)]
mod tests {
    use super::RequestPhase::*;
    use super::*;

    #[test]
    fn hit_path_is_valid() {
        let mut flow = RequestFlow::start();
        for next in [CacheCheck, CacheHit, Respond] {
            flow.advance(next);
        }
        assert_eq!(flow.path(), &[Start, CacheCheck, CacheHit, Respond]);
        assert!(flow.current().is_terminal());
    }

    #[test]
    fn miss_paths_are_valid() {
        let mut ok = RequestFlow::start();
        for next in [CacheCheck, CacheMiss, Invoke, InvokeOk, Store, Respond] {
            ok.advance(next);
        }
        assert_eq!(ok.current(), Respond);

        let mut failed = RequestFlow::start();
        for next in [CacheCheck, CacheMiss, Invoke, InvokeFail, ErrorRespond] {
            failed.advance(next);
        }
        assert_eq!(failed.current(), ErrorRespond);
    }

    #[test]
    fn shortcuts_are_rejected() {
        assert!(!Start.can_transition_to(Invoke));
        assert!(!CacheHit.can_transition_to(Store));
        assert!(!InvokeFail.can_transition_to(Store));
        assert!(!Respond.can_transition_to(CacheCheck));
        assert!(!ErrorRespond.can_transition_to(Respond));
    }
}
