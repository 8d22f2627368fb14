use std::net::Ipv4Addr;
use std::str::FromStr;

pub const SENTINEL_PORT: &str = "SENTINEL_PORT";

const DEFAULT_PORT: u16 = 8080;

pub fn get_default_port() -> u16 {
    DEFAULT_PORT
}

pub const SENTINEL_ADDR: &str = "SENTINEL_ADDR";

const DEFAULT_ADDR: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 0);

pub fn get_default_addr() -> Ipv4Addr {
    DEFAULT_ADDR
}

/// Read an environment variable, `None` when unset or empty
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// Read and parse an environment variable, `None` when unset or unparsable
pub fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|value| value.trim().parse().ok())
}

/// Strip everything outside printable ASCII (notification headers must be ASCII)
pub fn ascii_only(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii() && !c.is_ascii_control())
        .collect::<String>()
        .trim()
        .to_string()
}
