use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::messages::SensorCommand;

use super::loop_worker::{sensing_loop, PageInput, SensorSetup};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "sensor";

use crate::log_info;

const PAGE_INPUT_CAPACITY: usize = 128;

/// Owns one tab's sensor task.
pub struct SensorController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    input_tx: Option<mpsc::Sender<PageInput>>,
}

impl SensorController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
            input_tx: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start_sensing(
        &mut self,
        setup: SensorSetup,
        commands: mpsc::Receiver<SensorCommand>,
    ) -> Result<()> {
        if self.handle.is_some() {
            bail!("sensing already active");
        }

        let tab_id = setup.hub.tab_id();
        let cancel_token = CancellationToken::new();
        let (input_tx, input_rx) = mpsc::channel(PAGE_INPUT_CAPACITY);

        let handle = tokio::spawn(sensing_loop(setup, input_rx, commands, cancel_token.clone()));
        log_info!("sensor started for tab {}", tab_id);

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        self.input_tx = Some(input_tx);
        Ok(())
    }

    /// Forward a page report. Dropped when the sensor is stopped or backed up.
    pub fn feed(&self, input: PageInput) -> bool {
        match &self.input_tx {
            Some(tx) => tx.try_send(input).is_ok(),
            None => false,
        }
    }

    pub async fn stop_sensing(&mut self) -> Result<()> {
        self.input_tx = None;
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("sensing loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for SensorController {
    fn default() -> Self {
        Self::new()
    }
}
