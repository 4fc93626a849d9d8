//! Hexen II status query: the QuakeWorld exchange on the offset query port.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProbeError;
use crate::probe::Probe;
use crate::target::ProbeTarget;
use crate::Strategy;

use super::quake::query_status;
use super::quake1::normalize_status;

pub struct Hexen2 {
    timeout: Duration,
}

impl Hexen2 {
    pub fn new(timeout: Duration) -> Self {
        Hexen2 { timeout }
    }
}

#[async_trait]
impl Strategy for Hexen2 {
    fn name(&self) -> &'static str {
        "hexen2"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let response = query_status(
            &target.address,
            target.query_port,
            self.timeout,
            b"status\0",
            b"n",
        )
        .await?;
        Ok(normalize_status(target, response, 3))
    }
}
