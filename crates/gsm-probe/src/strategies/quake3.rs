//! Quake III Arena getstatus query.
//!
//! Same row shape as Quake II plus `^N` color codes in free-text fields,
//! which are stripped during normalization.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProbeError;
use crate::probe::Probe;
use crate::strip::strip_quake_colors;
use crate::target::ProbeTarget;
use crate::Strategy;

use super::quake::query_status;
use super::quake1::normalize_status;

pub struct Quake3 {
    timeout: Duration,
}

impl Quake3 {
    pub fn new(timeout: Duration) -> Self {
        Quake3 { timeout }
    }
}

#[async_trait]
impl Strategy for Quake3 {
    fn name(&self) -> &'static str {
        "quake3"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let response = query_status(
            &target.address,
            target.query_port,
            self.timeout,
            b"getstatus\n",
            b"statusResponse\n",
        )
        .await?;
        let mut probe = normalize_status(target, response, 1);
        probe.name = strip_quake_colors(&probe.name);
        probe.map = strip_quake_colors(&probe.map);
        if let Some(players) = &mut probe.players {
            for player in players {
                player.name = strip_quake_colors(&player.name);
            }
        }
        if let Some(bots) = &mut probe.bots {
            for bot in bots {
                bot.name = strip_quake_colors(&bot.name);
            }
        }
        Ok(probe)
    }
}
