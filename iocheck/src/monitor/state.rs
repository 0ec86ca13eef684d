/// Lifecycle of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Idle between ticks, no read in flight
    Waiting,
    /// A read is in flight
    Checking,
    /// Stop was requested while a read was in flight
    Stopping,
}

/// Inputs driving the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Tick,
    Complete,
    StopRequest,
}

/// Side effect the runner performs after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    BeginProbe,
    WarnBlocked,
    ReportStopping,
    Exit,
    /// Nothing to do
    None,
    /// The input cannot happen in this state
    Unexpected,
}

impl State {
    pub fn on(self, input: Input) -> (State, Action) {
        match (self, input) {
            (State::Waiting, Input::Tick) => (State::Checking, Action::BeginProbe),
            (State::Waiting, Input::Complete) => (State::Waiting, Action::Unexpected),
            (State::Waiting, Input::StopRequest) => (State::Waiting, Action::Exit),

            // At most one read in flight
            (State::Checking, Input::Tick) => (State::Checking, Action::WarnBlocked),
            (State::Checking, Input::Complete) => (State::Waiting, Action::None),
            (State::Checking, Input::StopRequest) => (State::Stopping, Action::ReportStopping),

            (State::Stopping, Input::Tick) => (State::Stopping, Action::WarnBlocked),
            // Was stopped during the read
            (State::Stopping, Input::Complete) => (State::Stopping, Action::Exit),
            (State::Stopping, Input::StopRequest) => (State::Stopping, Action::ReportStopping),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        let table = [
            (State::Waiting, Input::Tick, State::Checking, Action::BeginProbe),
            (State::Waiting, Input::Complete, State::Waiting, Action::Unexpected),
            (State::Waiting, Input::StopRequest, State::Waiting, Action::Exit),
            (State::Checking, Input::Tick, State::Checking, Action::WarnBlocked),
            (State::Checking, Input::Complete, State::Waiting, Action::None),
            (State::Checking, Input::StopRequest, State::Stopping, Action::ReportStopping),
            (State::Stopping, Input::Tick, State::Stopping, Action::WarnBlocked),
            (State::Stopping, Input::Complete, State::Stopping, Action::Exit),
            (State::Stopping, Input::StopRequest, State::Stopping, Action::ReportStopping),
        ];

        for (state, input, next, action) in table {
            assert_eq!(state.on(input), (next, action), "{:?} on {:?}", state, input);
        }
    }

    #[test]
    fn test_stop_during_check_waits_for_completion() {
        let (state, _) = State::Waiting.on(Input::Tick);
        let (state, action) = state.on(Input::StopRequest);
        assert_eq!(action, Action::ReportStopping);

        // Ticks and repeated stops never start another read or exit early
        let (state, action) = state.on(Input::Tick);
        assert_eq!(action, Action::WarnBlocked);
        let (state, action) = state.on(Input::StopRequest);
        assert_eq!(action, Action::ReportStopping);

        let (_, action) = state.on(Input::Complete);
        assert_eq!(action, Action::Exit);
    }
}
