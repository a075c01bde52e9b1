//! Event trait for business payloads carried through the pipeline.

use serde::{de::DeserializeOwned, Serialize};

/// A business event that can be published and consumed.
///
/// The body is encoded as JSON. The identifier is returned to the publisher's
/// caller and logged by the consumer for correlation.
///
/// # Example
///
/// ```rust
/// use messaging::Event;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct OrderPlaced {
///     order_id: String,
///     total: f64,
/// }
///
/// impl Event for OrderPlaced {
///     fn event_id(&self) -> String {
///         self.order_id.clone()
///     }
///
///     fn event_type(&self) -> &'static str {
///         "order.placed"
///     }
/// }
/// ```
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable identifier of this event.
    fn event_id(&self) -> String;

    /// Event type name (for headers, logging and metrics).
    ///
    /// Default implementation uses the type name.
    fn event_type(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Serialize, Deserialize)]
    struct Ping {
        id: String,
    }

    impl Event for Ping {
        fn event_id(&self) -> String {
            self.id.clone()
        }
    }

    #[test]
    fn test_default_event_type_is_type_name() {
        let ping = Ping {
            id: "p-1".to_string(),
        };
        assert_eq!(ping.event_id(), "p-1");
        assert!(ping.event_type().ends_with("Ping"));
    }
}
