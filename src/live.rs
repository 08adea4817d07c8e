use tokio::sync::{mpsc, oneshot};

use crate::audio::CpalDevices;
use crate::config::Config;
use crate::error::Result;
use crate::net::client::LiveConnector;
use crate::session::events::EventSender;
use crate::session::tools::EmergencyReport;
use crate::session::{SessionController, SessionObserver, SessionSettings, SessionState};

const METER_WIDTH: usize = 30;

/// Host-side observer for the terminal: status and level go to the log,
/// submitted reports are printed to stdout.
#[derive(Debug, Default)]
pub struct ConsoleObserver {
    reports: usize,
}

impl SessionObserver for ConsoleObserver {
    fn on_status_change(&mut self, status: &str) {
        tracing::info!("status: {status}");
    }

    fn on_audio_level(&mut self, level: f32) {
        tracing::debug!("mic {} {level:.3}", meter(level));
    }

    fn on_report_submitted(&mut self, report: &EmergencyReport) {
        self.reports += 1;
        match serde_json::to_string_pretty(report) {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::warn!("failed to render report: {e}"),
        }
        tracing::info!("{} report(s) submitted this run", self.reports);
    }
}

fn meter(level: f32) -> String {
    let filled = (level.clamp(0.0, 1.0) * METER_WIDTH as f32).round() as usize;
    format!("[{}{}]", "#".repeat(filled), " ".repeat(METER_WIDTH - filled))
}

/// Run one live session until the peer hangs up, the connection fails, or
/// Ctrl+C is pressed.
pub async fn run_live(config: Config) -> Result<()> {
    let connector = LiveConnector::new(&config.session)?;
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let mut controller = SessionController::new(
        Box::new(CpalDevices::new(config.audio.clone())),
        Box::new(connector),
        Box::new(ConsoleObserver::default()),
        EventSender::new(event_tx),
        SessionSettings::from_config(&config.session),
    );

    controller.connect()?;

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received Ctrl+C, hanging up...");
        let _ = shutdown_tx.send(());
    });

    loop {
        tokio::select! {
            Some(envelope) = event_rx.recv() => {
                controller.handle_event(envelope);
                if controller.state() == SessionState::Disconnected {
                    break;
                }
            }
            _ = &mut shutdown_rx => {
                controller.stop();
                break;
            }
        }
    }

    tracing::debug!("live session loop finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meter_scales_and_clamps() {
        assert_eq!(meter(0.0), format!("[{}]", " ".repeat(METER_WIDTH)));
        assert_eq!(meter(1.0), format!("[{}]", "#".repeat(METER_WIDTH)));
        assert_eq!(meter(7.0), meter(1.0));
        assert_eq!(meter(0.5).matches('#').count(), METER_WIDTH / 2);
    }

    #[test]
    fn observer_counts_reports() {
        let mut observer = ConsoleObserver::default();
        observer.on_report_submitted(&EmergencyReport {
            emergency_type: "Fire".to_string(),
            description: "Smoke in the hallway".to_string(),
            people_count: Some(2),
            critical_needs: None,
        });
        assert_eq!(observer.reports, 1);
    }
}
