use crate::state_machine::{phases::Shared, StateMachine};

impl<T, C> StateMachine<T, C> {
    pub fn is_waiting_for_clients(&self) -> bool {
        matches!(self, StateMachine::WaitingForClients(_))
    }

    pub fn is_selecting(&self) -> bool {
        matches!(self, StateMachine::Selecting(_))
    }

    pub fn is_distributing(&self) -> bool {
        matches!(self, StateMachine::Distributing(_))
    }

    pub fn is_collecting(&self) -> bool {
        matches!(self, StateMachine::Collecting(_))
    }

    pub fn is_aggregating(&self) -> bool {
        matches!(self, StateMachine::Aggregating(_))
    }

    pub fn is_checkpointing(&self) -> bool {
        matches!(self, StateMachine::Checkpointing(_))
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, StateMachine::Finished(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, StateMachine::Failure(_))
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, StateMachine::Shutdown(_))
    }

    pub fn shared(&self) -> &Shared<T, C> {
        match self {
            StateMachine::WaitingForClients(state) => &state.shared,
            StateMachine::Selecting(state) => &state.shared,
            StateMachine::Distributing(state) => &state.shared,
            StateMachine::Collecting(state) => &state.shared,
            StateMachine::Aggregating(state) => &state.shared,
            StateMachine::Checkpointing(state) => &state.shared,
            StateMachine::Finished(state) => &state.shared,
            StateMachine::Failure(state) => &state.shared,
            StateMachine::Shutdown(state) => &state.shared,
        }
    }
}
