use std::convert::TryFrom;
use std::net::Ipv4Addr;

use crate::error::{Error, MessageHeaderError};
use crate::family::AddressFamily;
use crate::packet::attribute::Attribute;
use crate::packet::capability::Cap;
use crate::packet::prefix::Prefix;

// https://www.rfc-editor.org/rfc/rfc4271#section-4.1
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    // https://www.rfc-editor.org/rfc/rfc4271#section-4.2
    Open {
        version: u8,
        // four-octet AS numbers are carried here after capability negotiation
        as_num: u32,
        hold_time: u16,
        identifier: Ipv4Addr,
        capabilities: Vec<Cap>,
    },
    // https://www.rfc-editor.org/rfc/rfc4271#section-4.3
    Update {
        withdrawn_routes: Vec<Prefix>,
        attributes: Vec<Attribute>,
        nlri: Vec<Prefix>,
    },
    // https://www.rfc-editor.org/rfc/rfc4271#section-4.4
    Keepalive,
    // https://www.rfc-editor.org/rfc/rfc4271#section-4.5
    Notification {
        code: NotificationCode,
        subcode: Option<NotificationSubCode>,
        data: Vec<u8>,
    },
    // https://datatracker.ietf.org/doc/html/rfc2918#section-3
    RouteRefresh {
        family: AddressFamily,
    },
}

impl Message {
    pub const VERSION: u8 = 4;
    pub const HEADER_LENGTH: u16 = 19;
    pub const MAX_LENGTH: u16 = 4096;
    pub const MARKER: u128 = 0xffff_ffff_ffff_ffff_ffff_ffff_ffff_ffff;
    pub const AS_TRANS: u32 = 23456;
    pub const OPTION_TYPE_CAPABILITIES: u8 = 2;

    pub fn open(as_num: u32, hold_time: u16, identifier: Ipv4Addr, capabilities: Vec<Cap>) -> Self {
        Message::Open {
            version: Message::VERSION,
            as_num,
            hold_time,
            identifier,
            capabilities,
        }
    }

    pub fn notification(code: NotificationCode, subcode: Option<NotificationSubCode>) -> Self {
        Message::Notification {
            code,
            subcode,
            data: Vec::new(),
        }
    }

    pub fn msg_type(&self) -> MessageType {
        match self {
            Message::Open { .. } => MessageType::Open,
            Message::Update { .. } => MessageType::Update,
            Message::Keepalive => MessageType::Keepalive,
            Message::Notification { .. } => MessageType::Notification,
            Message::RouteRefresh { .. } => MessageType::RouteRefresh,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Open = 1,
    Update = 2,
    Notification = 3,
    Keepalive = 4,
    RouteRefresh = 5,
}

impl TryFrom<u8> for MessageType {
    type Error = MessageHeaderError;
    fn try_from(from: u8) -> Result<Self, Self::Error> {
        match from {
            1 => Ok(Self::Open),
            2 => Ok(Self::Update),
            3 => Ok(Self::Notification),
            4 => Ok(Self::Keepalive),
            5 => Ok(Self::RouteRefresh),
            _ => Err(MessageHeaderError::BadMessageType { val: from }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationCode {
    MessageHeader = 1,
    OpenMessage = 2,
    UpdateMessage = 3,
    HoldTimerExpired = 4,
    FiniteStateMachine = 5,
    Cease = 6,
}

impl TryFrom<u8> for NotificationCode {
    type Error = Error;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::MessageHeader),
            2 => Ok(Self::OpenMessage),
            3 => Ok(Self::UpdateMessage),
            4 => Ok(Self::HoldTimerExpired),
            5 => Ok(Self::FiniteStateMachine),
            6 => Ok(Self::Cease),
            _ => Err(Error::UnrecognizedNotificationCode(value)),
        }
    }
}

impl From<NotificationCode> for u8 {
    fn from(code: NotificationCode) -> u8 {
        code as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationSubCode {
    // MessageHeader
    ConnectionNotSynchronized,
    BadMessageLength,
    BadMessageType,
    // OpenMessage
    UnsupportedVersionNumber,
    BadPeerAS,
    BadBGPIdentifier,
    UnsupportedOptionalParameter,
    UnacceptableHoldTime,
    UnsupportedCapability,
    // UpdateMessage
    MalformedAttributeList,
    UnrecognizedWellknownAttribute,
    MissingWellknownAttribute,
    AttributeFlagsError,
    AttributeLengthError,
    InvalidOriginAttribute,
    InvalidNextHopAttribute,
    OptionalAttributeError,
    InvalidNetworkField,
    MalformedASPath,
    // Cease, https://www.rfc-editor.org/rfc/rfc4486#section-4
    MaximumNumberOfPrefixesReached,
    AdministrativeShutdown,
    PeerDeconfigured,
    AdministrativeReset,
    ConnectionRejected,
    OtherConfigurationChange,
    ConnectionCollisionResolution,
    OutOfResources,
}

impl NotificationSubCode {
    pub fn try_from_with_code(value: u8, code: NotificationCode) -> Result<Option<Self>, Error> {
        if value == 0 {
            return Ok(None);
        }
        let subcode = match code {
            NotificationCode::MessageHeader => match value {
                1 => Self::ConnectionNotSynchronized,
                2 => Self::BadMessageLength,
                3 => Self::BadMessageType,
                _ => return Err(Error::UnrecognizedNotificationSubCode(value)),
            },
            NotificationCode::OpenMessage => match value {
                1 => Self::UnsupportedVersionNumber,
                2 => Self::BadPeerAS,
                3 => Self::BadBGPIdentifier,
                4 => Self::UnsupportedOptionalParameter,
                6 => Self::UnacceptableHoldTime,
                7 => Self::UnsupportedCapability,
                _ => return Err(Error::UnrecognizedNotificationSubCode(value)),
            },
            NotificationCode::UpdateMessage => match value {
                1 => Self::MalformedAttributeList,
                2 => Self::UnrecognizedWellknownAttribute,
                3 => Self::MissingWellknownAttribute,
                4 => Self::AttributeFlagsError,
                5 => Self::AttributeLengthError,
                6 => Self::InvalidOriginAttribute,
                8 => Self::InvalidNextHopAttribute,
                9 => Self::OptionalAttributeError,
                10 => Self::InvalidNetworkField,
                11 => Self::MalformedASPath,
                _ => return Err(Error::UnrecognizedNotificationSubCode(value)),
            },
            NotificationCode::Cease => match value {
                1 => Self::MaximumNumberOfPrefixesReached,
                2 => Self::AdministrativeShutdown,
                3 => Self::PeerDeconfigured,
                4 => Self::AdministrativeReset,
                5 => Self::ConnectionRejected,
                6 => Self::OtherConfigurationChange,
                7 => Self::ConnectionCollisionResolution,
                8 => Self::OutOfResources,
                _ => return Err(Error::UnrecognizedNotificationSubCode(value)),
            },
            NotificationCode::HoldTimerExpired | NotificationCode::FiniteStateMachine => {
                return Ok(None)
            }
        };
        Ok(Some(subcode))
    }
}

impl From<NotificationSubCode> for u8 {
    fn from(subcode: NotificationSubCode) -> u8 {
        match subcode {
            NotificationSubCode::ConnectionNotSynchronized => 1,
            NotificationSubCode::BadMessageLength => 2,
            NotificationSubCode::BadMessageType => 3,
            NotificationSubCode::UnsupportedVersionNumber => 1,
            NotificationSubCode::BadPeerAS => 2,
            NotificationSubCode::BadBGPIdentifier => 3,
            NotificationSubCode::UnsupportedOptionalParameter => 4,
            NotificationSubCode::UnacceptableHoldTime => 6,
            NotificationSubCode::UnsupportedCapability => 7,
            NotificationSubCode::MalformedAttributeList => 1,
            NotificationSubCode::UnrecognizedWellknownAttribute => 2,
            NotificationSubCode::MissingWellknownAttribute => 3,
            NotificationSubCode::AttributeFlagsError => 4,
            NotificationSubCode::AttributeLengthError => 5,
            NotificationSubCode::InvalidOriginAttribute => 6,
            NotificationSubCode::InvalidNextHopAttribute => 8,
            NotificationSubCode::OptionalAttributeError => 9,
            NotificationSubCode::InvalidNetworkField => 10,
            NotificationSubCode::MalformedASPath => 11,
            NotificationSubCode::MaximumNumberOfPrefixesReached => 1,
            NotificationSubCode::AdministrativeShutdown => 2,
            NotificationSubCode::PeerDeconfigured => 3,
            NotificationSubCode::AdministrativeReset => 4,
            NotificationSubCode::ConnectionRejected => 5,
            NotificationSubCode::OtherConfigurationChange => 6,
            NotificationSubCode::ConnectionCollisionResolution => 7,
            NotificationSubCode::OutOfResources => 8,
        }
    }
}
