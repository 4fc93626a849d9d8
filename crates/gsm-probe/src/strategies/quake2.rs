//! Quake II status query. Player rows are `frags ping "name"`.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProbeError;
use crate::probe::Probe;
use crate::target::ProbeTarget;
use crate::Strategy;

use super::quake::query_status;
use super::quake1::normalize_status;

pub struct Quake2 {
    timeout: Duration,
}

impl Quake2 {
    pub fn new(timeout: Duration) -> Self {
        Quake2 { timeout }
    }
}

#[async_trait]
impl Strategy for Quake2 {
    fn name(&self) -> &'static str {
        "quake2"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let response = query_status(
            &target.address,
            target.query_port,
            self.timeout,
            b"status\n",
            b"print\n",
        )
        .await?;
        // frags ping "name" -> ping is the second field
        Ok(normalize_status(target, response, 1))
    }
}
