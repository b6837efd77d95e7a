//! Resource types driven by [`LifecycleDriver`](crate::lifecycle::LifecycleDriver).
//!
//! Each resource owns its hierarchy path, turns itself into `set` lines and
//! parses itself back from `display set relative` output.

mod key_chain;
mod vlan;

pub use key_chain::{KeyChain, KeyChainKey};
pub use vlan::{Vlan, VlanVxlan};

use crate::error::JunosError;

fn parse_number<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, JunosError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|err| JunosError::Decode {
        field: field.to_string(),
        reason: format!("failed to convert '{value}' to integer: {err}"),
    })
}
