use std::fmt;

use tokio::sync::watch;

use crate::event::{AdministrativeEvent, BgpMessageEvent, Event, TcpConnectionEvent, TimerEvent};

#[derive(Debug)]
pub struct FiniteStateMachine {
    state: State,
    notifier: Option<watch::Sender<State>>,
}

impl Default for FiniteStateMachine {
    fn default() -> Self {
        Self {
            state: State::Idle,
            notifier: None,
        }
    }
}

impl FiniteStateMachine {
    pub fn with_notifier(notifier: watch::Sender<State>) -> Self {
        Self {
            state: State::Idle,
            notifier: Some(notifier),
        }
    }

    pub fn get_state(&self) -> State {
        self.state
    }

    // https://www.rfc-editor.org/rfc/rfc4271#section-8.2.2
    // Only the active side is modeled; a speaker never listens for peers.
    pub fn mv(&mut self, event: Event) -> State {
        let next = match self.state {
            State::Idle => match event {
                Event::Admin(AdministrativeEvent::ManualStart)
                | Event::Timer(TimerEvent::ConnectRetryTimerExpire) => State::Connect,
                _ => State::Idle,
            },
            State::Connect => match event {
                Event::Connection(TcpConnectionEvent::TcpConnectionConfirmed) => State::OpenSent,
                Event::Timer(TimerEvent::ConnectRetryTimerExpire) => State::Connect,
                _ => State::Idle,
            },
            State::OpenSent => match event {
                Event::Message(BgpMessageEvent::BgpOpen) => State::OpenConfirm,
                _ => State::Idle,
            },
            State::OpenConfirm => match event {
                Event::Message(BgpMessageEvent::KeepAliveMsg) => State::Established,
                Event::Timer(TimerEvent::KeepaliveTimerExpire) => State::OpenConfirm,
                _ => State::Idle,
            },
            State::Established => match event {
                Event::Message(BgpMessageEvent::KeepAliveMsg)
                | Event::Message(BgpMessageEvent::UpdateMsg)
                | Event::Timer(TimerEvent::KeepaliveTimerExpire) => State::Established,
                _ => State::Idle,
            },
        };
        if next != self.state {
            tracing::info!(from=%self.state, to=%next, %event, "move state");
            self.state = next;
            if let Some(notifier) = &self.notifier {
                notifier.send_replace(next);
            }
        }
        next
    }
}

// https://www.rfc-editor.org/rfc/rfc4271#section-8.2.2
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum State {
    #[default]
    Idle,
    Connect,
    OpenSent,
    OpenConfirm,
    Established,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Idle => write!(f, "Idle"),
            State::Connect => write!(f, "Connect"),
            State::OpenSent => write!(f, "OpenSent"),
            State::OpenConfirm => write!(f, "OpenConfirm"),
            State::Established => write!(f, "Established"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{
        AdministrativeEvent, BgpMessageEvent, Event, TcpConnectionEvent, TimerEvent,
    };
    use rstest::rstest;

    #[rstest(
        input,
        expected,
        case(vec![Event::Message(BgpMessageEvent::UpdateMsg)], State::Idle),
        case(vec![Event::Admin(AdministrativeEvent::ManualStart)], State::Connect),
        case(vec![Event::Admin(AdministrativeEvent::ManualStart), Event::Connection(TcpConnectionEvent::TcpConnectionConfirmed), Event::Message(BgpMessageEvent::BgpOpen), Event::Message(BgpMessageEvent::KeepAliveMsg)], State::Established),
        case(vec![Event::Admin(AdministrativeEvent::ManualStart), Event::Connection(TcpConnectionEvent::TcpConnectionConfirmed), Event::Message(BgpMessageEvent::BgpOpen), Event::Timer(TimerEvent::KeepaliveTimerExpire), Event::Message(BgpMessageEvent::KeepAliveMsg), Event::Message(BgpMessageEvent::UpdateMsg)], State::Established),
        case(vec![Event::Admin(AdministrativeEvent::ManualStart), Event::Connection(TcpConnectionEvent::TcpConnectionConfirmed), Event::Message(BgpMessageEvent::BgpOpen), Event::Message(BgpMessageEvent::KeepAliveMsg), Event::Connection(TcpConnectionEvent::TcpConnectionFail)], State::Idle),
        case(vec![Event::Admin(AdministrativeEvent::ManualStart), Event::Connection(TcpConnectionEvent::TcpConnectionConfirmed), Event::Message(BgpMessageEvent::BgpOpen), Event::Message(BgpMessageEvent::KeepAliveMsg), Event::Timer(TimerEvent::HoldTimerExpire)], State::Idle),
        case(vec![Event::Admin(AdministrativeEvent::ManualStart), Event::Connection(TcpConnectionEvent::TcpConnectionConfirmed), Event::Message(BgpMessageEvent::BgpOpenMsgErr)], State::Idle),
        case(vec![Event::Admin(AdministrativeEvent::ManualStart), Event::Connection(TcpConnectionEvent::TcpConnectionFail)], State::Idle),
        case(vec![Event::Admin(AdministrativeEvent::ManualStart), Event::Connection(TcpConnectionEvent::TcpConnectionFail), Event::Timer(TimerEvent::ConnectRetryTimerExpire)], State::Connect),
        case(vec![Event::Admin(AdministrativeEvent::ManualStart), Event::Connection(TcpConnectionEvent::TcpConnectionConfirmed), Event::Message(BgpMessageEvent::BgpOpen), Event::Message(BgpMessageEvent::KeepAliveMsg), Event::Admin(AdministrativeEvent::ManualStop)], State::Idle),
    )]
    fn works_fsm_mv(input: Vec<Event>, expected: State) {
        let mut fsm = FiniteStateMachine::default();
        for e in input.iter() {
            fsm.mv(*e);
        }
        assert_eq!(expected, fsm.get_state())
    }

    #[test]
    fn works_fsm_notify_state() {
        let (tx, rx) = watch::channel(State::Idle);
        let mut fsm = FiniteStateMachine::with_notifier(tx);
        fsm.mv(Event::Admin(AdministrativeEvent::ManualStart));
        assert_eq!(State::Connect, *rx.borrow());
        fsm.mv(Event::Connection(TcpConnectionEvent::TcpConnectionConfirmed));
        assert_eq!(State::OpenSent, *rx.borrow());
    }
}
