use std::fmt;

use crate::error::Error;

/// Inputs to the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Admin(AdministrativeEvent),
    Timer(TimerEvent),
    Connection(TcpConnectionEvent),
    Message(BgpMessageEvent),
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Admin(e) => write!(f, "Admin::{e:?}"),
            Event::Timer(e) => write!(f, "Timer::{e:?}"),
            Event::Connection(e) => write!(f, "Connection::{e:?}"),
            Event::Message(e) => write!(f, "Message::{e:?}"),
        }
    }
}

impl From<&Error> for Event {
    // The event a failed session feeds into the state machine before going Idle.
    fn from(err: &Error) -> Self {
        match err {
            Error::MessageHeader(_) => Event::Message(BgpMessageEvent::BgpHeaderError),
            Error::OpenMessage(_) => Event::Message(BgpMessageEvent::BgpOpenMsgErr),
            Error::UpdateMessage(_) => Event::Message(BgpMessageEvent::UpdateMsgErr),
            Error::PeerNotification { .. }
            | Error::UnrecognizedNotificationCode(_)
            | Error::UnrecognizedNotificationSubCode(_) => Event::Message(BgpMessageEvent::NotifMsg),
            Error::HoldTimerExpired => Event::Timer(TimerEvent::HoldTimerExpire),
            Error::SessionClosed => Event::Admin(AdministrativeEvent::ManualStop),
            _ => Event::Connection(TcpConnectionEvent::TcpConnectionFail),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdministrativeEvent {
    ManualStart,
    ManualStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    ConnectRetryTimerExpire,
    HoldTimerExpire,
    KeepaliveTimerExpire,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpConnectionEvent {
    TcpConnectionConfirmed,
    TcpConnectionFail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BgpMessageEvent {
    BgpOpen,
    BgpHeaderError,
    BgpOpenMsgErr,
    NotifMsg,
    KeepAliveMsg,
    UpdateMsg,
    UpdateMsgErr,
}
