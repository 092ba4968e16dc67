use std::collections::HashSet;
use std::convert::TryFrom;
use std::net::Ipv4Addr;

use byteorder::{NetworkEndian, WriteBytesExt};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::*;
use crate::family::{AddressFamily, Afi};
use crate::packet::attribute::Attribute;
use crate::packet::capability::Cap;
use crate::packet::message::{Message, MessageType, NotificationCode, NotificationSubCode};
use crate::packet::prefix::Prefix;

/// Frames BGP messages on a TCP stream.
///
/// AS_PATH width depends on the four-octet AS capability, so the session
/// flips `as4_enabled` once both OPEN messages have been exchanged.
#[derive(Debug, Default)]
pub struct Codec {
    as4_enabled: bool,
}

impl Codec {
    pub fn new(as4_enabled: bool) -> Self {
        Self { as4_enabled }
    }

    pub fn set_as4(&mut self, enabled: bool) {
        self.as4_enabled = enabled;
    }
}

impl Decoder for Codec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header_length = Message::HEADER_LENGTH as usize;
        if src.len() < header_length {
            return Ok(None);
        }
        let length = u16::from_be_bytes([src[16], src[17]]);
        if length < Message::HEADER_LENGTH || length > Message::MAX_LENGTH {
            return Err(MessageHeaderError::BadMessageLength { length }.into());
        }
        if src.len() < length as usize {
            src.reserve(length as usize - src.len());
            return Ok(None);
        }
        let mut frame = src.split_to(length as usize);
        decode_msg(&mut frame, self.as4_enabled).map(Some)
    }
}

fn need(buf: &BytesMut, n: usize, err: impl Into<Error>) -> Result<(), Error> {
    if buf.remaining() < n {
        return Err(err.into());
    }
    Ok(())
}

#[tracing::instrument(skip(src))]
fn decode_msg(src: &mut BytesMut, as4_enabled: bool) -> Result<Message, Error> {
    let marker = src.get_u128();
    if marker != Message::MARKER {
        return Err(MessageHeaderError::ConnectionNotSynchronized.into());
    }
    let length = src.get_u16();
    let message_type = MessageType::try_from(src.get_u8())?;
    let bad_length = MessageHeaderError::BadMessageLength { length };
    let message = match message_type {
        MessageType::Open => {
            need(src, 10, bad_length)?;
            let version = src.get_u8();
            if version != Message::VERSION {
                return Err(OpenMessageError::UnsupportedVersionNumber.into());
            }
            let as_num = src.get_u16() as u32;
            let hold_time = src.get_u16();
            let identifier = Ipv4Addr::from(src.get_u32());
            let optional_parameters_length = src.get_u8() as usize;
            if optional_parameters_length != src.remaining() {
                return Err(OpenMessageError::Unspecific.into());
            }
            let mut capabilities = Vec::new();
            while src.has_remaining() {
                need(src, 2, OpenMessageError::Unspecific)?;
                let option_type = src.get_u8();
                let option_length = src.get_u8() as usize;
                need(src, option_length, OpenMessageError::Unspecific)?;
                let mut option = src.split_to(option_length);
                if option_type != Message::OPTION_TYPE_CAPABILITIES {
                    return Err(OpenMessageError::UnsupportedOptionalParameter.into());
                }
                while option.has_remaining() {
                    need(&option, 2, OpenMessageError::Unspecific)?;
                    let code = option.get_u8();
                    let cap_length = option.get_u8();
                    capabilities.push(Cap::decode(code, cap_length, &mut option)?);
                }
            }
            Message::Open {
                version,
                as_num,
                hold_time,
                identifier,
                capabilities,
            }
        }
        MessageType::Update => {
            need(src, 2, UpdateMessageError::MalformedAttributeList)?;
            let withdrawn_routes_length = src.get_u16() as usize;
            need(
                src,
                withdrawn_routes_length + 2,
                UpdateMessageError::MalformedAttributeList,
            )?;
            let mut withdrawn = src.split_to(withdrawn_routes_length);
            let mut withdrawn_routes = Vec::new();
            while withdrawn.has_remaining() {
                withdrawn_routes.push(Prefix::decode(Afi::IPv4, &mut withdrawn)?);
            }

            let total_path_attribute_length = src.get_u16() as usize;
            need(
                src,
                total_path_attribute_length,
                UpdateMessageError::MalformedAttributeList,
            )?;
            let mut attrs = src.split_to(total_path_attribute_length);
            let mut attributes = Vec::new();
            let mut seen = HashSet::new();
            while attrs.has_remaining() {
                let attr = Attribute::decode(&mut attrs, as4_enabled)?;
                if !seen.insert(attr.code()) {
                    return Err(UpdateMessageError::MalformedAttributeList.into());
                }
                attributes.push(attr);
            }

            let mut nlri = Vec::new();
            while src.has_remaining() {
                nlri.push(Prefix::decode(Afi::IPv4, src)?);
            }

            let mut mandatory = Vec::new();
            if !nlri.is_empty() || seen.contains(&Attribute::MP_REACH_NLRI) {
                mandatory.extend([Attribute::ORIGIN, Attribute::AS_PATH]);
            }
            if !nlri.is_empty() {
                mandatory.push(Attribute::NEXT_HOP);
            }
            if let Some(missing) = mandatory.into_iter().find(|code| !seen.contains(code)) {
                return Err(UpdateMessageError::MissingWellKnownAttribute(missing).into());
            }

            Message::Update {
                withdrawn_routes,
                attributes,
                nlri,
            }
        }
        MessageType::Keepalive => {
            if src.has_remaining() {
                return Err(bad_length.into());
            }
            Message::Keepalive
        }
        MessageType::Notification => {
            need(src, 2, bad_length)?;
            let code = NotificationCode::try_from(src.get_u8())?;
            let subcode = NotificationSubCode::try_from_with_code(src.get_u8(), code)?;
            let data = src.split().to_vec();
            Message::Notification {
                code,
                subcode,
                data,
            }
        }
        MessageType::RouteRefresh => {
            if src.remaining() != 4 {
                return Err(bad_length.into());
            }
            let family =
                AddressFamily::try_from(src.get_u32()).map_err(|_| Error::RouteRefreshMessageError)?;
            Message::RouteRefresh { family }
        }
    };
    Ok(message)
}

impl Encoder<Message> for Codec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let msg_head = dst.len();
        dst.put_u128(Message::MARKER);
        let header_length_head = dst.len();
        dst.put_u16(Message::HEADER_LENGTH);
        dst.put_u8(item.msg_type() as u8);
        match item {
            Message::Open {
                version,
                as_num,
                hold_time,
                identifier,
                capabilities,
            } => {
                dst.put_u8(version);
                dst.put_u16(if as_num > u16::MAX as u32 {
                    Message::AS_TRANS
                } else {
                    as_num
                } as u16);
                dst.put_u16(hold_time);
                dst.put_slice(&identifier.octets());
                // one optional parameter per capability
                dst.put_u8(capabilities.iter().fold(0, |l, cap| l + 2 + cap.len()) as u8);
                for cap in capabilities.iter() {
                    dst.put_u8(Message::OPTION_TYPE_CAPABILITIES);
                    dst.put_u8(cap.len() as u8);
                    cap.encode(dst);
                }
            }
            Message::Update {
                withdrawn_routes,
                attributes,
                nlri,
            } => {
                let withdrawn_head = dst.len();
                dst.put_u16(0);
                for route in withdrawn_routes.iter() {
                    route.encode(dst);
                }
                let withdrawn_length = dst.len() - withdrawn_head - 2;
                (&mut dst.as_mut()[withdrawn_head..])
                    .write_u16::<NetworkEndian>(withdrawn_length as u16)?;

                let attributes_head = dst.len();
                dst.put_u16(0);
                for attr in attributes.iter() {
                    attr.encode(dst, self.as4_enabled);
                }
                let attributes_length = dst.len() - attributes_head - 2;
                (&mut dst.as_mut()[attributes_head..])
                    .write_u16::<NetworkEndian>(attributes_length as u16)?;

                for prefix in nlri.iter() {
                    prefix.encode(dst);
                }
            }
            Message::Keepalive => {}
            Message::Notification {
                code,
                subcode,
                data,
            } => {
                dst.put_u8(code.into());
                dst.put_u8(subcode.map(u8::from).unwrap_or(0));
                dst.put_slice(&data);
            }
            Message::RouteRefresh { family } => {
                dst.put_u32(family.into());
            }
        }
        let length = dst.len() - msg_head;
        if length > Message::MAX_LENGTH as usize {
            dst.truncate(msg_head);
            return Err(MessageHeaderError::BadMessageLength {
                length: length.min(u16::MAX as usize) as u16,
            }
            .into());
        }
        (&mut dst.as_mut()[header_length_head..]).write_u16::<NetworkEndian>(length as u16)?;
        Ok(())
    }
}
