pub mod action;
pub mod flow;
pub mod timeout;

pub mod prelude {
    pub use crate::action::{Action, ActionBody};
    pub use crate::flow::Flow;
}

pub use action::{Action, ActionBody};
pub use flow::Flow;
pub use timeout::timeout_error;
