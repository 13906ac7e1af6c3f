//! Typed message payloads (§4.1).

use crate::optpool::OptPool;

/// Wire-level discriminant for each message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    RequestJoin = 1,
    ResponseJoin = 2,
    Ping = 3,
    RequestExec = 4,
    RequestBuildTree = 5,
    ResponseBuildTree = 6,
    RequestTask = 7,
    ResponseTask = 8,
    RequestExit = 9,
    ResponseExit = 10,
}

impl MessageType {
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            1 => MessageType::RequestJoin,
            2 => MessageType::ResponseJoin,
            3 => MessageType::Ping,
            4 => MessageType::RequestExec,
            5 => MessageType::RequestBuildTree,
            6 => MessageType::ResponseBuildTree,
            7 => MessageType::RequestTask,
            8 => MessageType::ResponseTask,
            9 => MessageType::RequestExit,
            10 => MessageType::ResponseExit,
            _ => return None,
        })
    }
}

/// The decoded payload carried by a frame, tagged by [`MessageType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    RequestJoin { pid: u32, ip: u32, port: u32 },
    ResponseJoin { addr: u32, opts: OptPool },
    Ping { now: u64 },
    RequestExec { host: String, argv: Vec<String> },
    RequestBuildTree { hosts: Vec<i32> },
    ResponseBuildTree { deads: u32 },
    RequestTask { path: String, argv: Vec<String>, channel: u32 },
    ResponseTask { ret: u32 },
    RequestExit { signum: u32 },
    ResponseExit,
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::RequestJoin { .. } => MessageType::RequestJoin,
            Message::ResponseJoin { .. } => MessageType::ResponseJoin,
            Message::Ping { .. } => MessageType::Ping,
            Message::RequestExec { .. } => MessageType::RequestExec,
            Message::RequestBuildTree { .. } => MessageType::RequestBuildTree,
            Message::ResponseBuildTree { .. } => MessageType::ResponseBuildTree,
            Message::RequestTask { .. } => MessageType::RequestTask,
            Message::ResponseTask { .. } => MessageType::ResponseTask,
            Message::RequestExit { .. } => MessageType::RequestExit,
            Message::ResponseExit => MessageType::ResponseExit,
        }
    }
}
