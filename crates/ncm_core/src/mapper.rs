//! Parameter mapping between the public record and storage
//!
//! `FIELD_SCHEMA` lists every leaf field once: its storage key, its mask
//! bit, how it is encoded and how to read or write it on the record. Save
//! and load walk the schema and touch only the fields the mask selects.

use tracing::debug;

use crate::error::{NcmError, NcmResult};
use crate::params::{
    ConnectionParameter, ParameterMask, IP_ADDRESS_LEN, PROXY_PASSWORD_LEN, PROXY_URL_LEN,
    PROXY_USER_NAME_LEN, SSID_LEN, WIFI_PASSWORD_LEN,
};
use crate::storage::{ParameterStore, StorageError, StorageValue};

/// Storage encoding of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// String in a buffer of `capacity` bytes, terminator included
    Str { capacity: usize },
    Raw,
}

/// Schema entry for one leaf field
pub struct FieldSpec {
    pub key: &'static str,
    pub mask: ParameterMask,
    pub kind: FieldKind,
    get: fn(&ConnectionParameter) -> StorageValue,
    set: fn(&mut ConnectionParameter, StorageValue) -> bool,
}

impl FieldSpec {
    fn default_value(&self) -> StorageValue {
        match self.kind {
            FieldKind::Str { .. } => StorageValue::Str(String::new()),
            FieldKind::Raw => StorageValue::Raw(0),
        }
    }
}

/// Encoded field, ready for the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredField {
    pub key: &'static str,
    pub value: StorageValue,
}

macro_rules! str_field {
    ($key:literal, $mask:ident, $capacity:expr, $($path:ident).+) => {
        FieldSpec {
            key: $key,
            mask: ParameterMask::$mask,
            kind: FieldKind::Str { capacity: $capacity },
            get: |p| StorageValue::Str(p.$($path).+.clone()),
            set: |p, value| match value {
                StorageValue::Str(s) => {
                    p.$($path).+ = s;
                    true
                }
                StorageValue::Raw(_) => false,
            },
        }
    };
}

macro_rules! raw_field {
    ($key:literal, $mask:ident, $($path:ident).+) => {
        FieldSpec {
            key: $key,
            mask: ParameterMask::$mask,
            kind: FieldKind::Raw,
            get: |p| StorageValue::Raw(p.$($path).+),
            set: |p, value| match value {
                StorageValue::Raw(v) => {
                    p.$($path).+ = v;
                    true
                }
                StorageValue::Str(_) => false,
            },
        }
    };
}

pub const FIELD_SCHEMA: &[FieldSpec] = &[
    str_field!("normal.ip_address", NORMAL_IP_ADDRESS, IP_ADDRESS_LEN, normal.dev_ip.ip_address),
    str_field!("normal.subnet_mask", NORMAL_SUBNET_MASK, IP_ADDRESS_LEN, normal.dev_ip.subnet_mask),
    str_field!("normal.gateway", NORMAL_GATEWAY, IP_ADDRESS_LEN, normal.dev_ip.gateway),
    str_field!("normal.dns", NORMAL_DNS, IP_ADDRESS_LEN, normal.dev_ip.dns),
    str_field!("normal.ip_address_v6", NORMAL_IP_ADDRESS_V6, IP_ADDRESS_LEN, normal.dev_ip_v6.ip_address),
    str_field!("normal.subnet_mask_v6", NORMAL_SUBNET_MASK_V6, IP_ADDRESS_LEN, normal.dev_ip_v6.subnet_mask),
    str_field!("normal.gateway_v6", NORMAL_GATEWAY_V6, IP_ADDRESS_LEN, normal.dev_ip_v6.gateway),
    str_field!("normal.dns_v6", NORMAL_DNS_V6, IP_ADDRESS_LEN, normal.dev_ip_v6.dns),
    raw_field!("normal.ip_method", NORMAL_IP_METHOD, normal.ip_method),
    raw_field!("normal.netif_kind", NORMAL_NETIF_KIND, normal.netif_kind),
    str_field!("normal.sta_ssid", NORMAL_STA_SSID, SSID_LEN, normal.wifi_sta.ssid),
    str_field!("normal.sta_password", NORMAL_STA_PASSWORD, WIFI_PASSWORD_LEN, normal.wifi_sta.password),
    raw_field!("normal.sta_encryption", NORMAL_STA_ENCRYPTION, normal.wifi_sta.encryption),
    str_field!("ap.ip_address", AP_IP_ADDRESS, IP_ADDRESS_LEN, access_point.dev_ip.ip_address),
    str_field!("ap.subnet_mask", AP_SUBNET_MASK, IP_ADDRESS_LEN, access_point.dev_ip.subnet_mask),
    str_field!("ap.gateway", AP_GATEWAY, IP_ADDRESS_LEN, access_point.dev_ip.gateway),
    str_field!("ap.dns", AP_DNS, IP_ADDRESS_LEN, access_point.dev_ip.dns),
    str_field!("ap.ssid", AP_SSID, SSID_LEN, access_point.wifi_ap.ssid),
    str_field!("ap.password", AP_PASSWORD, WIFI_PASSWORD_LEN, access_point.wifi_ap.password),
    raw_field!("ap.encryption", AP_ENCRYPTION, access_point.wifi_ap.encryption),
    raw_field!("ap.channel", AP_CHANNEL, access_point.wifi_ap.channel),
    str_field!("proxy.url", PROXY_URL, PROXY_URL_LEN, proxy.url),
    raw_field!("proxy.port", PROXY_PORT, proxy.port),
    str_field!("proxy.username", PROXY_USERNAME, PROXY_USER_NAME_LEN, proxy.username),
    str_field!("proxy.password", PROXY_PASSWORD, PROXY_PASSWORD_LEN, proxy.password),
];

fn selected(mask: ParameterMask) -> impl Iterator<Item = &'static FieldSpec> {
    FIELD_SCHEMA.iter().filter(move |spec| mask.contains(spec.mask))
}

/// Encode the masked fields of `parameter` into their storage form.
pub fn encode(mask: ParameterMask, parameter: &ConnectionParameter) -> NcmResult<Vec<StoredField>> {
    selected(mask)
        .map(|spec| {
            let value = (spec.get)(parameter);
            if let (FieldKind::Str { capacity }, StorageValue::Str(s)) = (spec.kind, &value) {
                if s.len() >= capacity {
                    return Err(NcmError::invalid_parameter(format!(
                        "{} does not fit {capacity} bytes",
                        spec.key
                    )));
                }
            }
            Ok(StoredField {
                key: spec.key,
                value,
            })
        })
        .collect()
}

/// Write the masked fields of `parameter` to `store`.
pub fn save(
    store: &dyn ParameterStore,
    mask: ParameterMask,
    parameter: &ConnectionParameter,
) -> NcmResult<()> {
    let fields = encode(mask, parameter)?;
    write_fields(store, &fields)
}

/// Write already encoded fields to `store`.
pub fn write_fields(store: &dyn ParameterStore, fields: &[StoredField]) -> NcmResult<()> {
    for field in fields {
        store.save(field.key, &field.value)?;
    }
    Ok(())
}

/// Fill the masked fields of `parameter` from `store`.
///
/// Keys missing from storage reset their field to the default. Returns the
/// number of keys that were present.
pub fn load(
    store: &dyn ParameterStore,
    mask: ParameterMask,
    parameter: &mut ConnectionParameter,
) -> NcmResult<usize> {
    let mut found = 0;
    for spec in selected(mask) {
        let value = match store.load(spec.key)? {
            Some(value) => {
                found += 1;
                value
            }
            None => spec.default_value(),
        };
        if !(spec.set)(parameter, value) {
            return Err(StorageError::Corrupt {
                key: spec.key.to_string(),
                message: "unexpected value type".to_string(),
            }
            .into());
        }
    }
    debug!(found, "parameters loaded");
    Ok(found)
}

/// True when `store` holds a value for the single leaf `field`.
pub fn is_stored(store: &dyn ParameterStore, field: ParameterMask) -> NcmResult<bool> {
    match FIELD_SCHEMA.iter().find(|spec| spec.mask == field) {
        Some(spec) => Ok(store.load(spec.key)?.is_some()),
        None => Ok(false),
    }
}
