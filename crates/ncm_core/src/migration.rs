//! Legacy configuration import
//!
//! Runs once at bring-up. The interface kind must migrate; every other item
//! is optional and a failure there is logged and skipped so the device can
//! still come up with a partial configuration.

use ncm_hal::{MigrationDataId, MigrationSource, NetifKind};
use tracing::{debug, info, warn};

use crate::error::{NcmError, NcmResult};
use crate::manager::ConnectionManager;
use crate::params::{netif_kind_from_raw, ConnectionParameter, ParameterMask};

type Apply = fn(&mut ConnectionParameter, &[u8]) -> NcmResult<()>;

struct Item {
    id: MigrationDataId,
    mask: ParameterMask,
    wifi_only: bool,
    apply: Apply,
}

const OPTIONAL_ITEMS: &[Item] = &[
    Item {
        id: MigrationDataId::IpMethod,
        mask: ParameterMask::NORMAL_IP_METHOD,
        wifi_only: false,
        apply: |p, raw| {
            p.normal.ip_method = parse_int(raw)?;
            Ok(())
        },
    },
    Item {
        id: MigrationDataId::StaticIpAddress,
        mask: ParameterMask::NORMAL_IP_ADDRESS,
        wifi_only: false,
        apply: |p, raw| {
            p.normal.dev_ip.ip_address = read_text(raw)?;
            Ok(())
        },
    },
    Item {
        id: MigrationDataId::StaticSubnetMask,
        mask: ParameterMask::NORMAL_SUBNET_MASK,
        wifi_only: false,
        apply: |p, raw| {
            p.normal.dev_ip.subnet_mask = read_text(raw)?;
            Ok(())
        },
    },
    Item {
        id: MigrationDataId::StaticGateway,
        mask: ParameterMask::NORMAL_GATEWAY,
        wifi_only: false,
        apply: |p, raw| {
            p.normal.dev_ip.gateway = read_text(raw)?;
            Ok(())
        },
    },
    Item {
        id: MigrationDataId::StaticDns,
        mask: ParameterMask::NORMAL_DNS,
        wifi_only: false,
        apply: |p, raw| {
            p.normal.dev_ip.dns = read_text(raw)?;
            Ok(())
        },
    },
    Item {
        id: MigrationDataId::WifiSsid,
        mask: ParameterMask::NORMAL_STA_SSID,
        wifi_only: true,
        apply: |p, raw| {
            p.normal.wifi_sta.ssid = read_text(raw)?;
            Ok(())
        },
    },
    Item {
        id: MigrationDataId::WifiPassword,
        mask: ParameterMask::NORMAL_STA_PASSWORD,
        wifi_only: true,
        apply: |p, raw| {
            p.normal.wifi_sta.password = read_text(raw)?;
            Ok(())
        },
    },
    Item {
        id: MigrationDataId::ProxyUrl,
        mask: ParameterMask::PROXY_URL,
        wifi_only: false,
        apply: |p, raw| {
            p.proxy.url = read_text(raw)?;
            Ok(())
        },
    },
    Item {
        id: MigrationDataId::ProxyPort,
        mask: ParameterMask::PROXY_PORT,
        wifi_only: false,
        apply: |p, raw| {
            p.proxy.port = parse_int(raw)?;
            Ok(())
        },
    },
    Item {
        id: MigrationDataId::ProxyUsername,
        mask: ParameterMask::PROXY_USERNAME,
        wifi_only: false,
        apply: |p, raw| {
            p.proxy.username = read_text(raw)?;
            Ok(())
        },
    },
    Item {
        id: MigrationDataId::ProxyPassword,
        mask: ParameterMask::PROXY_PASSWORD,
        wifi_only: false,
        apply: |p, raw| {
            p.proxy.password = read_text(raw)?;
            Ok(())
        },
    },
];

pub(crate) fn execute(manager: &ConnectionManager, source: &dyn MigrationSource) -> NcmResult<()> {
    let pending: Vec<NetifKind> = [NetifKind::Ethernet, NetifKind::Wifi]
        .into_iter()
        .filter(|kind| source.is_need_migration(*kind))
        .collect();
    if pending.is_empty() {
        debug!("no legacy configuration to migrate");
        return Ok(());
    }

    source.init()?;
    let result = migrate(manager, source);
    if let Err(e) = source.fin() {
        warn!(error = %e, "closing legacy configuration failed");
    }
    result
}

fn migrate(manager: &ConnectionManager, source: &dyn MigrationSource) -> NcmResult<()> {
    let raw = source.get_migration_data(MigrationDataId::NetifKind)?;
    let kind_raw = parse_int(&raw)?;
    let kind = netif_kind_from_raw(kind_raw)
        .ok_or_else(|| NcmError::invalid_parameter(format!("legacy netif kind {kind_raw}")))?;
    let mut parameter = ConnectionParameter::default();
    parameter.normal.netif_kind = kind_raw;
    manager.save_parameter(ParameterMask::NORMAL_NETIF_KIND, &parameter)?;

    let mut migrated = 1;
    for item in OPTIONAL_ITEMS {
        if item.wifi_only && kind != NetifKind::Wifi {
            continue;
        }
        match migrate_item(manager, source, item) {
            Ok(()) => migrated += 1,
            Err(e) => warn!(item = %item.id, error = %e, "legacy item skipped"),
        }
    }
    info!(netif = %kind, migrated, "legacy configuration migrated");
    Ok(())
}

fn migrate_item(
    manager: &ConnectionManager,
    source: &dyn MigrationSource,
    item: &Item,
) -> NcmResult<()> {
    let raw = source.get_migration_data(item.id)?;
    let mut parameter = ConnectionParameter::default();
    (item.apply)(&mut parameter, &raw)?;
    manager.save_parameter(item.mask, &parameter)
}

/// Text up to the first NUL
fn read_text(raw: &[u8]) -> NcmResult<String> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    std::str::from_utf8(&raw[..end])
        .map(str::to_string)
        .map_err(|e| NcmError::invalid_parameter(format!("legacy text: {e}")))
}

fn parse_int(raw: &[u8]) -> NcmResult<i32> {
    let text = read_text(raw)?;
    text.trim()
        .parse()
        .map_err(|_| NcmError::invalid_parameter(format!("legacy number {text:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_text_stops_at_nul() {
        assert_eq!(read_text(b"home\0garbage").unwrap(), "home");
        assert_eq!(read_text(b"plain").unwrap(), "plain");
        assert!(read_text(&[0xff, 0xfe, 0]).is_err());
    }

    #[test]
    fn test_parse_int_trims() {
        assert_eq!(parse_int(b" 8080 \0").unwrap(), 8080);
        assert!(parse_int(b"eighty\0").is_err());
        assert!(parse_int(b"\0").is_err());
    }

    #[test]
    fn test_wifi_only_items_are_station_fields() {
        for item in OPTIONAL_ITEMS.iter().filter(|item| item.wifi_only) {
            assert!(ParameterMask::NORMAL_WIFI_STA.contains(item.mask));
        }
    }
}
