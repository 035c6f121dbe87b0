//! System control events for queue and worker lifecycle.

use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Shutdown,
    Flush,
    Pause,
    Resume,
}

impl ControlCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlCommand::Shutdown => "shutdown",
            ControlCommand::Flush => "flush",
            ControlCommand::Pause => "pause",
            ControlCommand::Resume => "resume",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControlData {
    pub command: ControlCommand,
}

impl ControlData {
    pub(super) fn extend_transport(&self, record: &mut Map<String, Value>) {
        record.insert("command".into(), json!(self.command.as_str()));
    }
}
