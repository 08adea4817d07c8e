use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;

use crate::net::protocol::{
    FunctionCall, FunctionDeclaration, FunctionResponse, FunctionResult, ReportOutcome,
    ToolResponseMessage,
};

/// Name of the one tool the remote agent may call.
pub const REPORT_TOOL_NAME: &str = "reportEmergency";

/// Arguments of a `reportEmergency` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyReport {
    pub emergency_type: String,
    pub description: String,
    #[serde(
        default,
        deserialize_with = "people_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub people_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_needs: Option<String>,
}

// The agent encodes counts as JSON numbers, which may arrive as `3.0`.
fn people_count<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(number) = Option::<serde_json::Number>::deserialize(deserializer)? else {
        return Ok(None);
    };

    if let Some(n) = number.as_u64() {
        return u32::try_from(n)
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("peopleCount out of range: {n}")));
    }

    match number.as_f64() {
        Some(f) if f.is_finite() && f >= 0.0 && f <= f64::from(u32::MAX) => {
            Ok(Some(f.round() as u32))
        }
        _ => Err(serde::de::Error::custom(format!(
            "peopleCount must be a non-negative number, got {number}"
        ))),
    }
}

/// The `reportEmergency` declaration sent with the session setup.
#[must_use]
pub fn report_emergency_declaration() -> FunctionDeclaration {
    FunctionDeclaration {
        name: REPORT_TOOL_NAME.to_string(),
        description: "Submit a completed emergency report once the caller has described \
            the situation."
            .to_string(),
        parameters: json!({
            "type": "OBJECT",
            "properties": {
                "emergencyType": {
                    "type": "STRING",
                    "description": "Kind of emergency, e.g. Fire, Flood, Medical, Earthquake."
                },
                "description": {
                    "type": "STRING",
                    "description": "Short summary of what is happening and where."
                },
                "peopleCount": {
                    "type": "NUMBER",
                    "description": "Number of people affected, if known."
                },
                "criticalNeeds": {
                    "type": "STRING",
                    "description": "Urgent needs such as medical care, water or evacuation."
                }
            },
            "required": ["emergencyType", "description"]
        }),
    }
}

/// Issues ticket identifiers from the wall clock, never repeating one.
#[derive(Debug, Default)]
pub struct TicketClock {
    last_millis: i64,
}

impl TicketClock {
    pub fn next(&mut self) -> String {
        self.next_at(chrono::Utc::now().timestamp_millis())
    }

    fn next_at(&mut self, now_millis: i64) -> String {
        self.last_millis = now_millis.max(self.last_millis + 1);
        format!("ER-{}", self.last_millis)
    }
}

/// Answers `reportEmergency` calls and ignores every other tool name.
#[derive(Debug, Default)]
pub struct ToolCallMediator {
    tickets: TicketClock,
}

impl ToolCallMediator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle every call from one inbound message.
    ///
    /// `on_report` fires once per recognized call with valid arguments.
    /// Returns the batched response, or `None` when no call was recognized.
    pub fn handle<F>(
        &mut self,
        calls: &[FunctionCall],
        mut on_report: F,
    ) -> Option<ToolResponseMessage>
    where
        F: FnMut(&EmergencyReport),
    {
        let mut responses = Vec::new();

        for call in calls {
            if call.name != REPORT_TOOL_NAME {
                tracing::debug!("ignoring call to unknown tool '{}'", call.name);
                continue;
            }

            let outcome = match serde_json::from_value::<EmergencyReport>(call.args.clone()) {
                Ok(report) => {
                    on_report(&report);
                    let ticket_id = self.tickets.next();
                    tracing::info!(
                        "report '{}' accepted as {ticket_id} (call {})",
                        report.emergency_type,
                        call.id
                    );
                    ReportOutcome::Success { ticket_id }
                }
                Err(e) => {
                    tracing::warn!("rejecting {REPORT_TOOL_NAME} call {}: {e}", call.id);
                    ReportOutcome::Error {
                        error: format!("invalid arguments: {e}"),
                    }
                }
            };

            responses.push(FunctionResponse {
                id: call.id.clone(),
                name: call.name.clone(),
                response: FunctionResult { result: outcome },
            });
        }

        if responses.is_empty() {
            None
        } else {
            Some(ToolResponseMessage {
                function_responses: responses,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, name: &str, args: serde_json::Value) -> FunctionCall {
        FunctionCall {
            id: id.to_string(),
            name: name.to_string(),
            args,
        }
    }

    fn flood() -> serde_json::Value {
        json!({"emergencyType": "Flood", "description": "Water rising"})
    }

    #[test]
    fn recognized_call_gets_success_response() {
        let mut mediator = ToolCallMediator::new();
        let mut reports = Vec::new();

        let response = mediator
            .handle(&[call("1", REPORT_TOOL_NAME, flood())], |r| {
                reports.push(r.clone());
            })
            .unwrap_or_else(|| panic!("expected a response"));

        assert_eq!(
            reports,
            vec![EmergencyReport {
                emergency_type: "Flood".to_string(),
                description: "Water rising".to_string(),
                people_count: None,
                critical_needs: None,
            }]
        );
        assert_eq!(response.function_responses.len(), 1);
        let only = &response.function_responses[0];
        assert_eq!(only.id, "1");
        assert_eq!(only.name, REPORT_TOOL_NAME);
        let ReportOutcome::Success { ref ticket_id } = only.response.result else {
            panic!("expected success");
        };
        assert!(ticket_id.starts_with("ER-") && ticket_id.len() > 3);
    }

    #[test]
    fn unrecognized_calls_are_ignored() {
        let mut mediator = ToolCallMediator::new();
        let mut fired = 0;
        let response = mediator.handle(&[call("7", "lookupWeather", json!({}))], |_| fired += 1);
        assert!(response.is_none());
        assert_eq!(fired, 0);
    }

    #[test]
    fn mixed_batch_answers_only_recognized_calls_in_order() {
        let mut mediator = ToolCallMediator::new();
        let mut seen = Vec::new();
        let calls = [
            call(
                "a",
                REPORT_TOOL_NAME,
                json!({"emergencyType": "Fire", "description": "Kitchen"}),
            ),
            call("b", "somethingElse", json!({})),
            call(
                "c",
                REPORT_TOOL_NAME,
                json!({"emergencyType": "Medical", "description": "Fall"}),
            ),
            call("d", "another", json!({})),
        ];

        let response = mediator
            .handle(&calls, |r| seen.push(r.emergency_type.clone()))
            .unwrap_or_else(|| panic!("expected a response"));

        assert_eq!(seen, vec!["Fire", "Medical"]);
        let ids: Vec<&str> = response
            .function_responses
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn tickets_are_unique_within_a_batch() {
        let mut mediator = ToolCallMediator::new();
        let calls = [
            call("1", REPORT_TOOL_NAME, flood()),
            call("2", REPORT_TOOL_NAME, flood()),
        ];
        let response = mediator
            .handle(&calls, |_| {})
            .unwrap_or_else(|| panic!("expected a response"));
        let tickets: Vec<String> = response
            .function_responses
            .iter()
            .filter_map(|r| match &r.response.result {
                ReportOutcome::Success { ticket_id } => Some(ticket_id.clone()),
                ReportOutcome::Error { .. } => None,
            })
            .collect();
        assert_eq!(tickets.len(), 2);
        assert_ne!(tickets[0], tickets[1]);
    }

    #[test]
    fn invalid_arguments_get_error_response_without_report() {
        let mut mediator = ToolCallMediator::new();
        let mut fired = 0;
        let response = mediator
            .handle(
                &[call("x", REPORT_TOOL_NAME, json!({"emergencyType": "Fire"}))],
                |_| fired += 1,
            )
            .unwrap_or_else(|| panic!("expected a response"));
        assert_eq!(fired, 0);
        assert!(matches!(
            response.function_responses[0].response.result,
            ReportOutcome::Error { .. }
        ));
    }

    #[test]
    fn optional_fields_parse() {
        let report: EmergencyReport = serde_json::from_value(json!({
            "emergencyType": "Earthquake",
            "description": "Building collapsed",
            "peopleCount": 3.0,
            "criticalNeeds": "Medical"
        }))
        .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(report.people_count, Some(3));
        assert_eq!(report.critical_needs.as_deref(), Some("Medical"));

        let report: EmergencyReport = serde_json::from_value(json!({
            "emergencyType": "Fire",
            "description": "Smoke",
            "peopleCount": 12
        }))
        .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(report.people_count, Some(12));

        let negative = serde_json::from_value::<EmergencyReport>(json!({
            "emergencyType": "Fire",
            "description": "Smoke",
            "peopleCount": -2
        }));
        assert!(negative.is_err());
    }

    #[test]
    fn ticket_clock_is_strictly_increasing() {
        let mut clock = TicketClock::default();
        assert_eq!(clock.next_at(1000), "ER-1000");
        assert_eq!(clock.next_at(1000), "ER-1001");
        assert_eq!(clock.next_at(999), "ER-1002");
        assert_eq!(clock.next_at(5000), "ER-5000");
    }

    #[test]
    fn declaration_requires_type_and_description() {
        let decl = report_emergency_declaration();
        assert_eq!(decl.name, REPORT_TOOL_NAME);
        assert_eq!(decl.parameters["required"], json!(["emergencyType", "description"]));
        assert_eq!(decl.parameters["properties"]["peopleCount"]["type"], "NUMBER");
    }
}
