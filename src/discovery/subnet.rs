use std::fmt;
use std::net::Ipv4Addr;

use crate::error::ConfigError;

/// IPv4 подсеть из строки CIDR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    network: Ipv4Addr,
    prefix: u8,
}

impl Subnet {
    /// Разбирает `a.b.c.d/n`; адрес приводится к началу подсети.
    pub fn parse(cidr: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidCidr {
            value: cidr.to_string(),
            reason: reason.to_string(),
        };

        let (addr, prefix) = cidr
            .trim()
            .split_once('/')
            .ok_or_else(|| invalid("missing prefix length"))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| invalid("only IPv4 addresses are supported"))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| invalid("prefix length is not a number"))?;
        if prefix > 32 {
            return Err(invalid("prefix length must be in 0..=32"));
        }

        let network = Ipv4Addr::from(u32::from(addr) & mask(prefix));
        Ok(Self { network, prefix })
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn cidr(&self) -> String {
        self.to_string()
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & mask(self.prefix) == u32::from(self.network)
    }

    /// Все адреса подсети, начиная с адреса сети.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        let mut next = Some(self.network);
        std::iter::from_fn(move || {
            let ip = next.filter(|ip| self.contains(*ip))?;
            next = increment_ip(ip);
            Some(ip)
        })
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// Следующий адрес с переносом между октетами; `None` после 255.255.255.255.
pub fn increment_ip(ip: Ipv4Addr) -> Option<Ipv4Addr> {
    u32::from(ip).checked_add(1).map(Ipv4Addr::from)
}

fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}
