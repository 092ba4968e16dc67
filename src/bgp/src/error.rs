use lbspeakerd_trace::error::TraceableError;
use thiserror::Error;

use crate::packet::message::{NotificationCode, NotificationSubCode};

#[derive(Debug, Error)]
pub enum Error {
    #[error("message header error: {0}")]
    MessageHeader(#[from] MessageHeaderError),
    #[error("OPEN message error: {0}")]
    OpenMessage(#[from] OpenMessageError),
    #[error("UPDATE message error: {0}")]
    UpdateMessage(#[from] UpdateMessageError),
    #[error("ROUTE-REFRESH message error")]
    RouteRefreshMessageError,
    #[error("unrecognized notification code {0}")]
    UnrecognizedNotificationCode(u8),
    #[error("unrecognized notification subcode {0}")]
    UnrecognizedNotificationSubCode(u8),
    #[error("hold timer expired")]
    HoldTimerExpired,
    #[error("unexpected message in state {state}")]
    FiniteStateMachine { state: String },
    #[error("peer sent notification {code:?} {subcode:?}")]
    PeerNotification {
        code: NotificationCode,
        subcode: Option<NotificationSubCode>,
    },
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("connection attempt timed out")]
    ConnectTimeout,
    #[error("session is closed")]
    SessionClosed,
    #[error("std::io::Error: {0}")]
    StdIoErr(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("advertisement error: {0}")]
    Advertisement(#[from] AdvertisementError),
}

impl Error {
    /// NOTIFICATION to send before tearing down a session that failed with this error.
    pub fn notification(&self) -> Option<(NotificationCode, Option<NotificationSubCode>)> {
        match self {
            Error::MessageHeader(e) => Some((
                NotificationCode::MessageHeader,
                Some(match e {
                    MessageHeaderError::ConnectionNotSynchronized => {
                        NotificationSubCode::ConnectionNotSynchronized
                    }
                    MessageHeaderError::BadMessageLength { .. } => {
                        NotificationSubCode::BadMessageLength
                    }
                    MessageHeaderError::BadMessageType { .. } => NotificationSubCode::BadMessageType,
                }),
            )),
            Error::OpenMessage(e) => Some((
                NotificationCode::OpenMessage,
                match e {
                    OpenMessageError::UnsupportedVersionNumber => {
                        Some(NotificationSubCode::UnsupportedVersionNumber)
                    }
                    OpenMessageError::BadPeerAS { .. } => Some(NotificationSubCode::BadPeerAS),
                    OpenMessageError::BadBGPIdentifier => {
                        Some(NotificationSubCode::BadBGPIdentifier)
                    }
                    OpenMessageError::UnsupportedOptionalParameter => {
                        Some(NotificationSubCode::UnsupportedOptionalParameter)
                    }
                    OpenMessageError::UnacceptableHoldTime(_) => {
                        Some(NotificationSubCode::UnacceptableHoldTime)
                    }
                    OpenMessageError::UnsupportedCapability => {
                        Some(NotificationSubCode::UnsupportedCapability)
                    }
                    OpenMessageError::Unspecific => None,
                },
            )),
            Error::UpdateMessage(e) => Some((
                NotificationCode::UpdateMessage,
                Some(match e {
                    UpdateMessageError::MalformedAttributeList => {
                        NotificationSubCode::MalformedAttributeList
                    }
                    UpdateMessageError::UnrecognizedWellknownAttribute(_) => {
                        NotificationSubCode::UnrecognizedWellknownAttribute
                    }
                    UpdateMessageError::MissingWellKnownAttribute(_) => {
                        NotificationSubCode::MissingWellknownAttribute
                    }
                    UpdateMessageError::AttributeFlagsError { .. } => {
                        NotificationSubCode::AttributeFlagsError
                    }
                    UpdateMessageError::AttributeLengthError { .. } => {
                        NotificationSubCode::AttributeLengthError
                    }
                    UpdateMessageError::InvalidOriginAttribute(_) => {
                        NotificationSubCode::InvalidOriginAttribute
                    }
                    UpdateMessageError::InvalidNextHopAttribute => {
                        NotificationSubCode::InvalidNextHopAttribute
                    }
                    UpdateMessageError::OptionalAttributeError => {
                        NotificationSubCode::OptionalAttributeError
                    }
                    UpdateMessageError::InvalidNetworkField => {
                        NotificationSubCode::InvalidNetworkField
                    }
                    UpdateMessageError::MalformedASPath => NotificationSubCode::MalformedASPath,
                }),
            )),
            Error::HoldTimerExpired => Some((NotificationCode::HoldTimerExpired, None)),
            Error::FiniteStateMachine { .. } => Some((NotificationCode::FiniteStateMachine, None)),
            _ => None,
        }
    }
}

impl TraceableError for Error {
    fn metric_label(&self) -> String {
        match self {
            Error::MessageHeader(_) => "message_header",
            Error::OpenMessage(_) => "open_message",
            Error::UpdateMessage(_) => "update_message",
            Error::RouteRefreshMessageError => "route_refresh_message",
            Error::UnrecognizedNotificationCode(_) | Error::UnrecognizedNotificationSubCode(_) => {
                "notification_message"
            }
            Error::HoldTimerExpired => "hold_timer_expired",
            Error::FiniteStateMachine { .. } => "finite_state_machine",
            Error::PeerNotification { .. } => "peer_notification",
            Error::ConnectionClosed => "connection_closed",
            Error::ConnectTimeout => "connect_timeout",
            Error::SessionClosed => "session_closed",
            Error::StdIoErr(_) => "io",
            Error::Config(_) => "config",
            Error::Advertisement(_) => "advertisement",
        }
        .to_string()
    }

    fn is_transient(&self) -> bool {
        !matches!(self, Error::Config(_) | Error::Advertisement(_))
    }
}

// https://www.rfc-editor.org/rfc/rfc4271#section-6.1
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MessageHeaderError {
    #[error("connection not synchronized")]
    ConnectionNotSynchronized,
    #[error("bad message length {length}")]
    BadMessageLength { length: u16 },
    #[error("bad message type {val}")]
    BadMessageType { val: u8 },
}

// https://www.rfc-editor.org/rfc/rfc4271#section-6.2
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OpenMessageError {
    #[error("unsupported version number")]
    UnsupportedVersionNumber,
    #[error("bad peer AS: expected {expected}, got {got}")]
    BadPeerAS { expected: u32, got: u32 },
    #[error("bad BGP identifier")]
    BadBGPIdentifier,
    #[error("unsupported optional parameter")]
    UnsupportedOptionalParameter,
    #[error("unacceptable hold time {0}")]
    UnacceptableHoldTime(u16),
    #[error("peer does not support four-octet AS numbers")]
    UnsupportedCapability,
    #[error("unspecific")]
    Unspecific,
}

// https://www.rfc-editor.org/rfc/rfc4271#section-6.3
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UpdateMessageError {
    #[error("malformed attribute list")]
    MalformedAttributeList,
    #[error("unrecognized well-known attribute {0}")]
    UnrecognizedWellknownAttribute(u8),
    #[error("missing well-known attribute {0}")]
    MissingWellKnownAttribute(u8),
    #[error("attribute flags error: code {code}, flags {flag:#04x}")]
    AttributeFlagsError { code: u8, flag: u8 },
    #[error("attribute length error: code {code}, length {length}")]
    AttributeLengthError { code: u8, length: usize },
    #[error("invalid ORIGIN attribute {0}")]
    InvalidOriginAttribute(u8),
    #[error("invalid NEXT_HOP attribute")]
    InvalidNextHopAttribute,
    #[error("optional attribute error")]
    OptionalAttributeError,
    #[error("invalid network field")]
    InvalidNetworkField,
    #[error("malformed AS_PATH")]
    MalformedASPath,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to load: {0}")]
    FailedToLoad(String),
    #[error("invalid hold time {0}")]
    InvalidHoldTime(u64),
    #[error("MD5 password must be at most 80 bytes, got {0}")]
    PasswordTooLong(usize),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdvertisementError {
    #[error("too many communities: {0}")]
    TooManyCommunities(usize),
    #[error("invalid community {0}")]
    InvalidCommunity(String),
    #[error("invalid prefix length {len} for {addr}")]
    InvalidPrefixLength { addr: String, len: u8 },
}
