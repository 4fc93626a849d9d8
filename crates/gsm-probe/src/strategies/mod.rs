//! One module per wire protocol, plus shared family cores (`quake`,
//! `master`).

pub mod asa;
pub mod ase;
pub mod assettocorsa;
pub mod battlefield;
pub mod beammp;
pub mod discord;
pub mod doom3;
pub mod eco;
pub mod factorio;
pub mod fivem;
pub mod front;
pub mod gamespy1;
pub mod gamespy2;
pub mod gamespy3;
pub mod gportal;
pub mod hexen2;
pub mod minecraft;
pub mod palworld;
pub mod quake1;
pub mod quake2;
pub mod quake3;
pub mod raknet;
pub mod samp;
pub mod satisfactory;
pub mod scpsl;
pub mod scum;
pub mod source;
pub mod teamspeak3;
pub mod terraria;
pub mod unreal2;
pub mod ut3;
pub mod vcmp;
pub mod won;

mod master;
mod quake;
