use crate::error::FlowError;
use serde::Serialize;
use serde_json::Value;

/// An entry published on a topic.
///
/// `Signal` is "Success or Failure as Data": a publisher decides once, at the
/// call boundary, whether it is handing over a value or a failure. Failures
/// are routed to the error channel no matter which topics a publisher is
/// bound to.
///
/// `Signal::Data(Value::Null)` is the absence of a value. It marks the end of
/// a stream and is what `"<topic>:end"` notifications carry.
#[derive(Debug, Clone)]
pub enum Signal {
    Data(Value),
    Fault(FlowError),
}

impl Signal {
    /// The end-of-stream marker.
    pub fn end() -> Self {
        Signal::Data(Value::Null)
    }

    /// Serialize any value into a signal; a serialization failure becomes a fault.
    pub fn serialize<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => Signal::Data(value),
            Err(err) => Signal::Fault(err.into()),
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Signal::Fault(_))
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Signal::Data(Value::Null))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Signal::Data(value) => Some(value),
            Signal::Fault(_) => None,
        }
    }

    pub fn into_result(self) -> Result<Value, FlowError> {
        match self {
            Signal::Data(value) => Ok(value),
            Signal::Fault(err) => Err(err),
        }
    }

    /// View the signal as a failure, as the error channel does.
    pub fn into_error(self) -> FlowError {
        match self {
            Signal::Data(value) => FlowError::from_value(value),
            Signal::Fault(err) => err,
        }
    }
}

impl From<Value> for Signal {
    fn from(value: Value) -> Self {
        Signal::Data(value)
    }
}

impl From<FlowError> for Signal {
    fn from(err: FlowError) -> Self {
        Signal::Fault(err)
    }
}

impl From<Result<Value, FlowError>> for Signal {
    fn from(result: Result<Value, FlowError>) -> Self {
        match result {
            Ok(value) => Signal::Data(value),
            Err(err) => Signal::Fault(err),
        }
    }
}

impl From<Option<Value>> for Signal {
    fn from(value: Option<Value>) -> Self {
        Signal::Data(value.unwrap_or(Value::Null))
    }
}

macro_rules! signal_from_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Signal {
                fn from(value: $ty) -> Self {
                    Signal::Data(Value::from(value))
                }
            }
        )*
    };
}

signal_from_scalar!(&str, String, bool, i32, i64, u32, u64, f64);

/// An event as seen by wildcard subscribers.
#[derive(Debug, Clone)]
pub struct TopicEvent {
    pub topic: String,
    pub signal: Signal,
}

/// What a producer function handed back to `define`.
///
/// `()` and `None` mean the producer publishes on its own (possibly later).
/// Anything else is published right away under the producer's topics.
pub trait Publication {
    fn into_publication(self) -> Option<Signal>;
}

impl Publication for () {
    fn into_publication(self) -> Option<Signal> {
        None
    }
}

impl Publication for Signal {
    fn into_publication(self) -> Option<Signal> {
        Some(self)
    }
}

impl Publication for Value {
    fn into_publication(self) -> Option<Signal> {
        Some(Signal::Data(self))
    }
}

impl Publication for Result<Value, FlowError> {
    fn into_publication(self) -> Option<Signal> {
        Some(self.into())
    }
}

impl<T: Publication> Publication for Option<T> {
    fn into_publication(self) -> Option<Signal> {
        self.and_then(Publication::into_publication)
    }
}

macro_rules! publication_from_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Publication for $ty {
                fn into_publication(self) -> Option<Signal> {
                    Some(Signal::from(self))
                }
            }
        )*
    };
}

publication_from_scalar!(&str, String, bool, i32, i64, u32, u64, f64);
