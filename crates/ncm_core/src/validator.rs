//! Parameter validation
//!
//! One predicate per leaf field. A predicate only runs when its field is
//! selected by the mask. `is_connect` distinguishes starting a connection
//! (fields must be usable) from saving or clearing stored values (empty is
//! fine).

use std::net::{Ipv4Addr, Ipv6Addr};

use tracing::warn;

use crate::error::{NcmError, NcmResult};
use crate::params::{
    ConnectionParameter, IpMethod, ParameterMask, WifiEncryption, AP_CHANNEL_MAX,
    IP_ADDRESS_LEN, NETIF_KIND_MAX, PROXY_PASSWORD_LEN, PROXY_URL_LEN, PROXY_USER_NAME_LEN,
    SSID_LEN, WIFI_PASSWORD_LEN,
};

/// Minimum passphrase length for WPA2/WPA3-PSK
const PASSPHRASE_MIN: usize = 8;
/// Length of a raw PSK written as hex
const PSK_HEX_LEN: usize = 64;

type Check = fn(&ConnectionParameter, bool) -> bool;

struct FieldRule {
    field: ParameterMask,
    name: &'static str,
    check: Check,
}

const RULES: &[FieldRule] = &[
    FieldRule {
        field: ParameterMask::NORMAL_IP_ADDRESS,
        name: "normal.dev_ip.ip_address",
        check: |p, c| static_ipv4(&p.normal.dev_ip.ip_address, c && is_static(p)),
    },
    FieldRule {
        field: ParameterMask::NORMAL_SUBNET_MASK,
        name: "normal.dev_ip.subnet_mask",
        check: |p, c| static_ipv4(&p.normal.dev_ip.subnet_mask, c && is_static(p)),
    },
    FieldRule {
        field: ParameterMask::NORMAL_GATEWAY,
        name: "normal.dev_ip.gateway",
        check: |p, _| optional_ipv4(&p.normal.dev_ip.gateway),
    },
    FieldRule {
        field: ParameterMask::NORMAL_DNS,
        name: "normal.dev_ip.dns",
        check: |p, _| optional_ipv4(&p.normal.dev_ip.dns),
    },
    FieldRule {
        field: ParameterMask::NORMAL_IP_ADDRESS_V6,
        name: "normal.dev_ip_v6.ip_address",
        check: |p, _| optional_ipv6(&p.normal.dev_ip_v6.ip_address),
    },
    FieldRule {
        field: ParameterMask::NORMAL_SUBNET_MASK_V6,
        name: "normal.dev_ip_v6.subnet_mask",
        check: |p, _| optional_ipv6(&p.normal.dev_ip_v6.subnet_mask),
    },
    FieldRule {
        field: ParameterMask::NORMAL_GATEWAY_V6,
        name: "normal.dev_ip_v6.gateway",
        check: |p, _| optional_ipv6(&p.normal.dev_ip_v6.gateway),
    },
    FieldRule {
        field: ParameterMask::NORMAL_DNS_V6,
        name: "normal.dev_ip_v6.dns",
        check: |p, _| optional_ipv6(&p.normal.dev_ip_v6.dns),
    },
    FieldRule {
        field: ParameterMask::NORMAL_IP_METHOD,
        name: "normal.ip_method",
        check: |p, _| in_range(p.normal.ip_method, 0, IpMethod::MAX),
    },
    FieldRule {
        field: ParameterMask::NORMAL_NETIF_KIND,
        name: "normal.netif_kind",
        check: |p, _| in_range(p.normal.netif_kind, 0, NETIF_KIND_MAX),
    },
    FieldRule {
        field: ParameterMask::NORMAL_STA_SSID,
        name: "normal.wifi_sta.ssid",
        check: |p, c| bounded(&p.normal.wifi_sta.ssid, usize::from(c), SSID_LEN),
    },
    FieldRule {
        field: ParameterMask::NORMAL_STA_PASSWORD,
        name: "normal.wifi_sta.password",
        check: |p, c| sta_password(&p.normal.wifi_sta.password, c),
    },
    FieldRule {
        field: ParameterMask::NORMAL_STA_ENCRYPTION,
        name: "normal.wifi_sta.encryption",
        check: |p, _| in_range(p.normal.wifi_sta.encryption, 0, WifiEncryption::MAX),
    },
    FieldRule {
        field: ParameterMask::AP_IP_ADDRESS,
        name: "access_point.dev_ip.ip_address",
        check: |p, c| static_ipv4(&p.access_point.dev_ip.ip_address, c),
    },
    FieldRule {
        field: ParameterMask::AP_SUBNET_MASK,
        name: "access_point.dev_ip.subnet_mask",
        check: |p, c| static_ipv4(&p.access_point.dev_ip.subnet_mask, c),
    },
    FieldRule {
        field: ParameterMask::AP_GATEWAY,
        name: "access_point.dev_ip.gateway",
        check: |p, _| optional_ipv4(&p.access_point.dev_ip.gateway),
    },
    FieldRule {
        field: ParameterMask::AP_DNS,
        name: "access_point.dev_ip.dns",
        check: |p, _| optional_ipv4(&p.access_point.dev_ip.dns),
    },
    FieldRule {
        field: ParameterMask::AP_SSID,
        name: "access_point.wifi_ap.ssid",
        check: |p, c| {
            let ssid = &p.access_point.wifi_ap.ssid;
            bounded(ssid, usize::from(c), SSID_LEN) && is_printable(ssid)
        },
    },
    FieldRule {
        field: ParameterMask::AP_PASSWORD,
        name: "access_point.wifi_ap.password",
        check: |p, c| ap_password(&p.access_point.wifi_ap.password, c),
    },
    FieldRule {
        field: ParameterMask::AP_ENCRYPTION,
        name: "access_point.wifi_ap.encryption",
        check: |p, _| in_range(p.access_point.wifi_ap.encryption, 0, WifiEncryption::MAX),
    },
    FieldRule {
        field: ParameterMask::AP_CHANNEL,
        name: "access_point.wifi_ap.channel",
        check: |p, c| in_range(p.access_point.wifi_ap.channel, i32::from(c), AP_CHANNEL_MAX),
    },
    FieldRule {
        field: ParameterMask::PROXY_URL,
        name: "proxy.url",
        check: |p, _| bounded(&p.proxy.url, 0, PROXY_URL_LEN),
    },
    FieldRule {
        field: ParameterMask::PROXY_PORT,
        name: "proxy.port",
        check: |p, _| in_range(p.proxy.port, 0, i32::from(u16::MAX)),
    },
    FieldRule {
        field: ParameterMask::PROXY_USERNAME,
        name: "proxy.username",
        check: |p, _| bounded(&p.proxy.username, 0, PROXY_USER_NAME_LEN),
    },
    FieldRule {
        field: ParameterMask::PROXY_PASSWORD,
        name: "proxy.password",
        check: |p, _| bounded(&p.proxy.password, 0, PROXY_PASSWORD_LEN),
    },
];

/// Check every masked field of `parameter`, stopping at the first failure.
pub fn validate(
    mask: ParameterMask,
    parameter: &ConnectionParameter,
    is_connect: bool,
) -> NcmResult<()> {
    let context = if is_connect { "connect" } else { "save" };
    for rule in RULES.iter().filter(|rule| mask.contains(rule.field)) {
        if !(rule.check)(parameter, is_connect) {
            warn!(field = rule.name, context, "parameter rejected");
            return Err(NcmError::invalid_parameter(format!(
                "{} ({context})",
                rule.name
            )));
        }
    }
    Ok(())
}

fn is_static(parameter: &ConnectionParameter) -> bool {
    IpMethod::from_raw(parameter.normal.ip_method) == Some(IpMethod::Static)
}

fn in_range(value: i32, min: i32, max: i32) -> bool {
    (min..=max).contains(&value)
}

/// `min..buffer` bytes: the buffer must keep room for its terminator.
fn bounded(value: &str, min: usize, buffer: usize) -> bool {
    value.len() >= min && value.len() < buffer
}

fn is_printable(value: &str) -> bool {
    value.bytes().all(|b| (0x20..=0x7e).contains(&b))
}

fn optional_ipv4(value: &str) -> bool {
    value.is_empty() || (value.len() < IP_ADDRESS_LEN && value.parse::<Ipv4Addr>().is_ok())
}

fn optional_ipv6(value: &str) -> bool {
    value.is_empty() || (value.len() < IP_ADDRESS_LEN && value.parse::<Ipv6Addr>().is_ok())
}

fn static_ipv4(value: &str, required: bool) -> bool {
    if value.is_empty() {
        return !required;
    }
    optional_ipv4(value)
}

/// Empty means an open network. Stored values only need to fit the buffer.
fn sta_password(value: &str, is_connect: bool) -> bool {
    if value.is_empty() {
        return true;
    }
    if !is_connect {
        return bounded(value, 0, WIFI_PASSWORD_LEN);
    }
    psk(value)
}

fn ap_password(value: &str, is_connect: bool) -> bool {
    if value.is_empty() {
        return !is_connect;
    }
    psk(value)
}

/// A 64-digit hex key or a printable passphrase of 8..=63 characters
fn psk(value: &str) -> bool {
    if value.len() == PSK_HEX_LEN {
        return value.bytes().all(|b| b.is_ascii_hexdigit());
    }
    bounded(value, PASSPHRASE_MIN, PSK_HEX_LEN) && is_printable(value)
}
