//! Legacy configuration source
//!
//! Older firmware kept connection settings in a platform-specific format.
//! The porting layer exposes them item by item so they can be imported once.

use std::fmt;

use crate::error::HalResult;
use crate::network::NetifKind;

/// Items a legacy configuration may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationDataId {
    NetifKind,
    IpMethod,
    StaticIpAddress,
    StaticSubnetMask,
    StaticGateway,
    StaticDns,
    WifiSsid,
    WifiPassword,
    ProxyUrl,
    ProxyPort,
    ProxyUsername,
    ProxyPassword,
}

impl fmt::Display for MigrationDataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationDataId::NetifKind => "netif_kind",
            MigrationDataId::IpMethod => "ip_method",
            MigrationDataId::StaticIpAddress => "static_ip_address",
            MigrationDataId::StaticSubnetMask => "static_subnet_mask",
            MigrationDataId::StaticGateway => "static_gateway",
            MigrationDataId::StaticDns => "static_dns",
            MigrationDataId::WifiSsid => "wifi_ssid",
            MigrationDataId::WifiPassword => "wifi_password",
            MigrationDataId::ProxyUrl => "proxy_url",
            MigrationDataId::ProxyPort => "proxy_port",
            MigrationDataId::ProxyUsername => "proxy_username",
            MigrationDataId::ProxyPassword => "proxy_password",
        };
        f.write_str(name)
    }
}

/// Read access to legacy configuration.
///
/// Values are NUL-terminated UTF-8; integers are encoded as decimal text.
pub trait MigrationSource: Send + Sync {
    fn is_need_migration(&self, kind: NetifKind) -> bool;
    fn init(&self) -> HalResult<()>;
    fn fin(&self) -> HalResult<()>;
    fn get_migration_data(&self, id: MigrationDataId) -> HalResult<Vec<u8>>;
}
