//! JSON messages exchanged with the live dialogue endpoint.
//!
//! Outbound:
//! ```text
//! {"setup": {"model", "generationConfig", "systemInstruction", "tools"}}
//! {"realtimeInput": {"mediaChunks": [{"mimeType", "data"}]}}
//! {"toolResponse": {"functionResponses": [{"id", "name", "response"}]}}
//! ```
//!
//! Inbound messages may carry audio under
//! `serverContent.modelTurn.parts[].inlineData.data` and/or function calls
//! under `toolCall.functionCalls`.

use serde::{Deserialize, Serialize};

use crate::error::{LifelineError, Result};
use crate::net::OpenRequest;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponseMessage),
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub tools: Vec<Tool>,
}

impl Setup {
    #[must_use]
    pub fn from_request(request: &OpenRequest) -> Self {
        Self {
            model: request.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec![request.modality],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: request.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![TextPart {
                    text: request.system_instruction.clone(),
                }],
            },
            tools: vec![Tool {
                function_declarations: request.tools.clone(),
            }],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Audio,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<Modality>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// A callable tool advertised to the remote agent at setup time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Base64 payload plus the MIME type describing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaBlob>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponseMessage {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: FunctionResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionResult {
    pub result: ReportOutcome,
}

/// Serialized as `{"status": "success", "ticketId": ...}` or `{"status": "error", "error": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ReportOutcome {
    Success {
        #[serde(rename = "ticketId")]
        ticket_id: String,
    },
    Error {
        error: String,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub tool_call: Option<ToolCall>,
    #[serde(default)]
    pub go_away: Option<serde_json::Value>,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| LifelineError::Protocol(format!("malformed server message: {e}")))
    }

    #[must_use]
    pub const fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.server_content.as_ref().is_some_and(|c| c.interrupted)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    /// The agent stopped talking because the caller spoke over it.
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<ServerPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerPart {
    #[serde(default)]
    pub inline_data: Option<MediaBlob>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

/// One function invocation requested by the remote agent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    /// Empty when the agent omitted it; such calls match no tool.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// What a server message asks the session to do.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Base64 PCM audio for playback.
    Audio(String),
    ToolCall(Vec<FunctionCall>),
    Both {
        audio: String,
        calls: Vec<FunctionCall>,
    },
    Neither,
}

impl InboundMessage {
    #[must_use]
    pub fn audio(&self) -> Option<&str> {
        match self {
            Self::Audio(data) | Self::Both { audio: data, .. } => Some(data.as_str()),
            Self::ToolCall(_) | Self::Neither => None,
        }
    }

    #[must_use]
    pub fn tool_calls(&self) -> &[FunctionCall] {
        match self {
            Self::ToolCall(calls) | Self::Both { calls, .. } => calls.as_slice(),
            Self::Audio(_) | Self::Neither => &[],
        }
    }
}

impl From<ServerMessage> for InboundMessage {
    fn from(msg: ServerMessage) -> Self {
        let audio = msg
            .server_content
            .and_then(|content| content.model_turn)
            .and_then(|turn| {
                turn.parts
                    .into_iter()
                    .find_map(|part| part.inline_data.map(|blob| blob.data))
            });

        let calls = msg
            .tool_call
            .map(|tc| tc.function_calls)
            .filter(|calls| !calls.is_empty());

        match (audio, calls) {
            (Some(audio), Some(calls)) => Self::Both { audio, calls },
            (Some(audio), None) => Self::Audio(audio),
            (None, Some(calls)) => Self::ToolCall(calls),
            (None, None) => Self::Neither,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn inbound(value: &serde_json::Value) -> InboundMessage {
        ServerMessage::parse(&value.to_string())
            .unwrap_or_else(|e| panic!("{e}"))
            .into()
    }

    #[test]
    fn realtime_input_wire_shape() {
        let msg = ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaBlob {
                mime_type: "audio/pcm;rate=16000".to_string(),
                data: "AAAA".to_string(),
            }],
        });
        let value: serde_json::Value =
            serde_json::from_str(&msg.to_json().unwrap_or_else(|e| panic!("{e}")))
                .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            value,
            json!({"realtimeInput": {"mediaChunks": [{"mimeType": "audio/pcm;rate=16000", "data": "AAAA"}]}})
        );
    }

    #[test]
    fn tool_response_wire_shape() {
        let msg = ClientMessage::ToolResponse(ToolResponseMessage {
            function_responses: vec![FunctionResponse {
                id: "1".to_string(),
                name: "reportEmergency".to_string(),
                response: FunctionResult {
                    result: ReportOutcome::Success {
                        ticket_id: "ER-42".to_string(),
                    },
                },
            }],
        });
        let value = serde_json::to_value(&msg).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            value,
            json!({"toolResponse": {"functionResponses": [{
                "id": "1",
                "name": "reportEmergency",
                "response": {"result": {"status": "success", "ticketId": "ER-42"}}
            }]}})
        );
    }

    #[test]
    fn error_outcome_wire_shape() {
        let value = serde_json::to_value(ReportOutcome::Error {
            error: "missing description".to_string(),
        })
        .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(value, json!({"status": "error", "error": "missing description"}));
    }

    #[test]
    fn setup_wire_shape() {
        let request = OpenRequest {
            model: "models/test".to_string(),
            modality: Modality::Audio,
            voice: "Puck".to_string(),
            system_instruction: "be calm".to_string(),
            tools: vec![FunctionDeclaration {
                name: "reportEmergency".to_string(),
                description: "d".to_string(),
                parameters: json!({"type": "OBJECT"}),
            }],
        };
        let value = serde_json::to_value(ClientMessage::Setup(Setup::from_request(&request)))
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            value,
            json!({"setup": {
                "model": "models/test",
                "generationConfig": {
                    "responseModalities": ["AUDIO"],
                    "speechConfig": {"voiceConfig": {"prebuiltVoiceConfig": {"voiceName": "Puck"}}}
                },
                "systemInstruction": {"parts": [{"text": "be calm"}]},
                "tools": [{"functionDeclarations": [
                    {"name": "reportEmergency", "description": "d", "parameters": {"type": "OBJECT"}}
                ]}]
            }})
        );
    }

    #[test]
    fn audio_only_message() {
        let msg = inbound(&json!({"serverContent": {"modelTurn": {"parts": [
            {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AQI="}}
        ]}}}));
        assert_eq!(msg, InboundMessage::Audio("AQI=".to_string()));
        assert_eq!(msg.audio(), Some("AQI="));
        assert!(msg.tool_calls().is_empty());
    }

    #[test]
    fn tool_call_only_message() {
        let msg = inbound(&json!({"toolCall": {"functionCalls": [
            {"id": "1", "name": "reportEmergency", "args": {"emergencyType": "Flood"}}
        ]}}));
        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "1");
        assert_eq!(calls[0].args["emergencyType"], "Flood");
        assert!(msg.audio().is_none());
    }

    #[test]
    fn audio_and_tool_call_in_one_message() {
        let msg = inbound(&json!({
            "serverContent": {"modelTurn": {"parts": [{"inlineData": {"data": "AAA="}}]}},
            "toolCall": {"functionCalls": [{"id": "9", "name": "other"}]}
        }));
        assert!(matches!(msg, InboundMessage::Both { .. }));
        assert_eq!(msg.audio(), Some("AAA="));
        assert_eq!(msg.tool_calls()[0].args, serde_json::Value::Null);
    }

    #[test]
    fn nameless_call_does_not_sink_the_message() {
        let msg = inbound(&json!({
            "serverContent": {"modelTurn": {"parts": [{"inlineData": {"data": "AAA="}}]}},
            "toolCall": {"functionCalls": [
                {"id": "1", "name": "reportEmergency", "args": {"emergencyType": "Flood"}},
                {"id": "2", "args": {}}
            ]}
        }));
        assert_eq!(msg.audio(), Some("AAA="));
        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "reportEmergency");
        assert_eq!(calls[1].id, "2");
        assert!(calls[1].name.is_empty());
    }

    #[test]
    fn interrupted_flag_is_read() {
        let msg = ServerMessage::parse(r#"{"serverContent": {"interrupted": true}}"#)
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(msg.is_interrupted());
        assert!(!ServerMessage::default().is_interrupted());
    }

    #[test]
    fn audio_found_after_text_part() {
        let msg = inbound(&json!({"serverContent": {"modelTurn": {"parts": [
            {"text": "thinking"},
            {"inlineData": {"data": "AAA="}}
        ]}}}));
        assert_eq!(msg.audio(), Some("AAA="));
    }

    #[test]
    fn control_messages_are_neither() {
        let setup =
            ServerMessage::parse(r#"{"setupComplete": {}}"#).unwrap_or_else(|e| panic!("{e}"));
        assert!(setup.is_setup_complete());
        assert_eq!(InboundMessage::from(setup), InboundMessage::Neither);

        assert_eq!(
            inbound(&json!({"serverContent": {"turnComplete": true}})),
            InboundMessage::Neither
        );
        assert_eq!(
            inbound(&json!({"toolCall": {"functionCalls": []}})),
            InboundMessage::Neither
        );
    }

    #[test]
    fn malformed_message_is_protocol_error() {
        assert!(matches!(
            ServerMessage::parse("{not json"),
            Err(LifelineError::Protocol(_))
        ));
    }
}
