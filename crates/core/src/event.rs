//! Domain & integration event abstractions.
//!
//! An aggregate's domain events form a closed enum, one variant per event
//! kind, each wrapping a payload struct of the same name. The
//! [`domain_events!`](crate::domain_events) macro declares such an enum and
//! derives the plumbing the aggregate and the repository need:
//!
//! - a static kind name per variant (`OrderPlaced`)
//! - a fully-qualified payload type name used to route deserialization
//! - payload (de)serialization without the enum wrapper
//! - [`EventKind`] impls so handlers can be registered per payload type
//!
//! ```ignore
//! domain_events! {
//!     #[derive(Debug, Clone, PartialEq)]
//!     pub enum AccountEvent {
//!         AccountOpened,
//!         FundsDeposited,
//!     }
//! }
//! ```
//!
//! Payload structs must live in the module that invokes the macro.

use thiserror::Error;

/// An immutable fact recorded by an aggregate.
pub trait DomainEvent: Clone + core::fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Short kind name, e.g. `OrderPlaced`.
    fn kind(&self) -> &'static str;

    /// Fully-qualified payload type, e.g. `my_crate::order::OrderPlaced`.
    fn type_name(&self) -> &'static str;

    /// Serialize the payload to a self-describing JSON document.
    fn to_payload(&self) -> Result<String, serde_json::Error>;

    /// Rebuild an event from its fully-qualified type name and payload.
    fn from_payload(type_name: &str, data: &str) -> Result<Self, PayloadError>
    where
        Self: Sized;
}

/// A payload type that is one variant of the event enum `E`.
pub trait EventKind<E>: Sized + 'static {
    const KIND: &'static str;

    fn narrow(event: &E) -> Option<&Self>;
}

/// An event meant for consumers outside the aggregate's boundary, published
/// only after the aggregate's changes are committed.
pub trait IntegrationEvent: Clone + core::fmt::Debug + PartialEq + Send + Sync + 'static {
    fn kind(&self) -> &'static str;

    fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error>;
}

/// Integration event type for aggregates that never publish any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoIntegrationEvents {}

impl IntegrationEvent for NoIntegrationEvents {
    fn kind(&self) -> &'static str {
        match *self {}
    }

    fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match *self {}
    }
}

/// Failure to turn a stored payload back into a domain event.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("unknown event payload type `{0}`")]
    UnknownType(String),

    #[error("malformed `{type_name}` payload: {source}")]
    Malformed {
        type_name: String,
        #[source]
        source: serde_json::Error,
    },
}

impl PayloadError {
    pub fn malformed(type_name: &str, source: serde_json::Error) -> Self {
        Self::Malformed {
            type_name: type_name.to_string(),
            source,
        }
    }
}

/// Declare a closed domain event enum; see the [module docs](crate::event).
#[macro_export]
macro_rules! domain_events {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $($variant($variant)),+
        }

        impl $crate::DomainEvent for $name {
            fn kind(&self) -> &'static str {
                match self {
                    $(Self::$variant(_) => ::core::stringify!($variant)),+
                }
            }

            fn type_name(&self) -> &'static str {
                match self {
                    $(Self::$variant(_) => ::core::concat!(::core::module_path!(), "::", ::core::stringify!($variant))),+
                }
            }

            fn to_payload(&self) -> ::core::result::Result<::std::string::String, $crate::__private::serde_json::Error> {
                match self {
                    $(Self::$variant(event) => $crate::__private::serde_json::to_string(event)),+
                }
            }

            fn from_payload(type_name: &str, data: &str) -> ::core::result::Result<Self, $crate::PayloadError> {
                $(
                    if type_name == ::core::concat!(::core::module_path!(), "::", ::core::stringify!($variant)) {
                        return $crate::__private::serde_json::from_str::<$variant>(data)
                            .map(Self::$variant)
                            .map_err(|e| $crate::PayloadError::malformed(type_name, e));
                    }
                )+
                ::core::result::Result::Err($crate::PayloadError::UnknownType(type_name.to_string()))
            }
        }

        $(
            impl $crate::EventKind<$name> for $variant {
                const KIND: &'static str = ::core::stringify!($variant);

                #[allow(unreachable_patterns)]
                fn narrow(event: &$name) -> ::core::option::Option<&Self> {
                    match event {
                        $name::$variant(event) => ::core::option::Option::Some(event),
                        _ => ::core::option::Option::None,
                    }
                }
            }

            impl ::core::convert::From<$variant> for $name {
                fn from(event: $variant) -> Self {
                    Self::$variant(event)
                }
            }
        )+
    };
}

/// Declare a closed integration event enum, one variant per payload struct.
#[macro_export]
macro_rules! integration_events {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $($variant($variant)),+
        }

        impl $crate::IntegrationEvent for $name {
            fn kind(&self) -> &'static str {
                match self {
                    $(Self::$variant(_) => ::core::stringify!($variant)),+
                }
            }

            fn to_payload(&self) -> ::core::result::Result<$crate::__private::serde_json::Value, $crate::__private::serde_json::Error> {
                match self {
                    $(Self::$variant(event) => $crate::__private::serde_json::to_value(event)),+
                }
            }
        }

        $(
            impl ::core::convert::From<$variant> for $name {
                fn from(event: $variant) -> Self {
                    Self::$variant(event)
                }
            }
        )+
    };
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::{domain_events, integration_events};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Opened {
        pub owner: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Deposited {
        pub amount: u64,
    }

    domain_events! {
        #[derive(Debug, Clone, PartialEq)]
        pub enum AccountEvent {
            Opened,
            Deposited,
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct AccountAnnounced {
        pub owner: String,
    }

    integration_events! {
        #[derive(Debug, Clone, PartialEq)]
        pub enum AccountIntegrationEvent {
            AccountAnnounced,
        }
    }

    #[test]
    fn kind_and_type_name_follow_the_payload_struct() {
        let event = AccountEvent::from(Deposited { amount: 5 });
        assert_eq!(event.kind(), "Deposited");
        assert_eq!(event.type_name(), concat!(module_path!(), "::Deposited"));
        assert_eq!(<Deposited as EventKind<AccountEvent>>::KIND, "Deposited");
    }

    #[test]
    fn payload_excludes_the_enum_wrapper() {
        let event = AccountEvent::from(Opened {
            owner: "ada".into(),
        });
        assert_eq!(event.to_payload().unwrap(), r#"{"owner":"ada"}"#);
    }

    #[test]
    fn payload_is_routed_back_by_type_name() {
        let event = AccountEvent::from(Deposited { amount: 42 });
        let data = event.to_payload().unwrap();

        let decoded = AccountEvent::from_payload(event.type_name(), &data).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn unknown_or_malformed_payloads_are_rejected() {
        let err = AccountEvent::from_payload("elsewhere::Withdrawn", "{}").unwrap_err();
        assert!(matches!(err, PayloadError::UnknownType(t) if t == "elsewhere::Withdrawn"));

        let type_name = concat!(module_path!(), "::Deposited");
        let err = AccountEvent::from_payload(type_name, r#"{"amount":"lots"}"#).unwrap_err();
        assert!(matches!(err, PayloadError::Malformed { .. }));
    }

    #[test]
    fn narrow_selects_only_the_matching_variant() {
        let event = AccountEvent::from(Opened {
            owner: "ada".into(),
        });
        assert!(<Opened as EventKind<AccountEvent>>::narrow(&event).is_some());
        assert!(<Deposited as EventKind<AccountEvent>>::narrow(&event).is_none());
    }

    #[test]
    fn integration_events_serialize_their_payload() {
        let event = AccountIntegrationEvent::from(AccountAnnounced {
            owner: "ada".into(),
        });
        assert_eq!(event.kind(), "AccountAnnounced");
        assert_eq!(event.to_payload().unwrap()["owner"], "ada");
    }
}
