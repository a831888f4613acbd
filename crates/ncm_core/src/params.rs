//! Connection parameters and field masks
//!
//! The parameter record is what provisioning hands in: strings and plain
//! integers, exactly as they arrive from a UI or QR code. Enumerated fields
//! stay raw `i32` here and are range-checked by the validator before they
//! are interpreted.

use std::fmt;

use bitflags::bitflags;
use ncm_hal::{NetifKind, WifiSecurity};
use serde::{Deserialize, Serialize};

/// Buffer sizes of the string fields, terminator included.
pub const IP_ADDRESS_LEN: usize = 40;
pub const SSID_LEN: usize = 33;
pub const WIFI_PASSWORD_LEN: usize = 65;
pub const PROXY_URL_LEN: usize = 257;
pub const PROXY_USER_NAME_LEN: usize = 33;
pub const PROXY_PASSWORD_LEN: usize = 33;

/// Connection mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Station side: Ethernet or Wi-Fi station
    Normal,
    /// The device is a Wi-Fi access point
    AccessPoint,
}

impl Mode {
    pub const ALL: [Mode; 2] = [Mode::Normal, Mode::AccessPoint];
    pub const COUNT: usize = 2;

    pub fn index(self) -> usize {
        match self {
            Mode::Normal => 0,
            Mode::AccessPoint => 1,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Normal => write!(f, "normal"),
            Mode::AccessPoint => write!(f, "access-point"),
        }
    }
}

/// What a handle may be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleType {
    /// May start and stop connections
    Control,
    /// Read-only queries
    Information,
}

/// IPv4 address assignment, raw values 0..=1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpMethod {
    Dhcp = 0,
    Static = 1,
}

impl IpMethod {
    pub const MAX: i32 = 1;

    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(IpMethod::Dhcp),
            1 => Some(IpMethod::Static),
            _ => None,
        }
    }
}

/// Raw interface-kind values: 0 Wi-Fi, 1 Ethernet
pub const NETIF_KIND_MAX: i32 = 1;

pub fn netif_kind_from_raw(raw: i32) -> Option<NetifKind> {
    match raw {
        0 => Some(NetifKind::Wifi),
        1 => Some(NetifKind::Ethernet),
        _ => None,
    }
}

pub fn netif_kind_to_raw(kind: NetifKind) -> i32 {
    match kind {
        NetifKind::Wifi => 0,
        NetifKind::Ethernet => 1,
    }
}

/// Wi-Fi encryption, raw values 0..=2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiEncryption {
    Wpa2Psk = 0,
    Wpa3Psk = 1,
    Wpa2Wpa3Psk = 2,
}

impl WifiEncryption {
    pub const MAX: i32 = 2;

    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(WifiEncryption::Wpa2Psk),
            1 => Some(WifiEncryption::Wpa3Psk),
            2 => Some(WifiEncryption::Wpa2Wpa3Psk),
            _ => None,
        }
    }

    pub fn security(self) -> WifiSecurity {
        match self {
            WifiEncryption::Wpa2Psk => WifiSecurity::Wpa2Psk,
            WifiEncryption::Wpa3Psk => WifiSecurity::Wpa3Psk,
            WifiEncryption::Wpa2Wpa3Psk => WifiSecurity::Wpa2Wpa3Psk,
        }
    }
}

/// Highest Wi-Fi channel an access point may use; 0 means "unset"
pub const AP_CHANNEL_MAX: i32 = 14;

/// Device address settings. Empty strings mean "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpSetting {
    pub ip_address: String,
    pub subnet_mask: String,
    pub gateway: String,
    pub dns: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiStaParameter {
    pub ssid: String,
    pub password: String,
    pub encryption: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiApParameter {
    pub ssid: String,
    pub password: String,
    pub encryption: i32,
    pub channel: i32,
}

/// Station-side settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalParameter {
    pub dev_ip: IpSetting,
    pub dev_ip_v6: IpSetting,
    pub ip_method: i32,
    pub netif_kind: i32,
    pub wifi_sta: WifiStaParameter,
}

/// Access-point settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPointParameter {
    pub dev_ip: IpSetting,
    pub wifi_ap: WifiApParameter,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyParameter {
    pub url: String,
    pub port: i32,
    pub username: String,
    pub password: String,
}

/// The full parameter record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParameter {
    pub normal: NormalParameter,
    pub access_point: AccessPointParameter,
    pub proxy: ProxyParameter,
}

impl ConnectionParameter {
    /// Copy with every password replaced, for logs and diagnostics
    pub fn redacted(&self) -> Self {
        fn hide(secret: &mut String) {
            if !secret.is_empty() {
                *secret = "********".to_string();
            }
        }
        let mut copy = self.clone();
        hide(&mut copy.normal.wifi_sta.password);
        hide(&mut copy.access_point.wifi_ap.password);
        hide(&mut copy.proxy.password);
        copy
    }
}

bitflags! {
    /// One bit per leaf field of [`ConnectionParameter`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ParameterMask: u32 {
        const NORMAL_IP_ADDRESS = 1 << 0;
        const NORMAL_SUBNET_MASK = 1 << 1;
        const NORMAL_GATEWAY = 1 << 2;
        const NORMAL_DNS = 1 << 3;
        const NORMAL_IP_ADDRESS_V6 = 1 << 4;
        const NORMAL_SUBNET_MASK_V6 = 1 << 5;
        const NORMAL_GATEWAY_V6 = 1 << 6;
        const NORMAL_DNS_V6 = 1 << 7;
        const NORMAL_IP_METHOD = 1 << 8;
        const NORMAL_NETIF_KIND = 1 << 9;
        const NORMAL_STA_SSID = 1 << 10;
        const NORMAL_STA_PASSWORD = 1 << 11;
        const NORMAL_STA_ENCRYPTION = 1 << 12;

        const AP_IP_ADDRESS = 1 << 13;
        const AP_SUBNET_MASK = 1 << 14;
        const AP_GATEWAY = 1 << 15;
        const AP_DNS = 1 << 16;
        const AP_SSID = 1 << 17;
        const AP_PASSWORD = 1 << 18;
        const AP_ENCRYPTION = 1 << 19;
        const AP_CHANNEL = 1 << 20;

        const PROXY_URL = 1 << 21;
        const PROXY_PORT = 1 << 22;
        const PROXY_USERNAME = 1 << 23;
        const PROXY_PASSWORD = 1 << 24;

        const NORMAL_DEV_IP = Self::NORMAL_IP_ADDRESS.bits()
            | Self::NORMAL_SUBNET_MASK.bits()
            | Self::NORMAL_GATEWAY.bits()
            | Self::NORMAL_DNS.bits();
        const NORMAL_DEV_IP_V6 = Self::NORMAL_IP_ADDRESS_V6.bits()
            | Self::NORMAL_SUBNET_MASK_V6.bits()
            | Self::NORMAL_GATEWAY_V6.bits()
            | Self::NORMAL_DNS_V6.bits();
        const NORMAL_WIFI_STA = Self::NORMAL_STA_SSID.bits()
            | Self::NORMAL_STA_PASSWORD.bits()
            | Self::NORMAL_STA_ENCRYPTION.bits();
        const NORMAL = Self::NORMAL_DEV_IP.bits()
            | Self::NORMAL_DEV_IP_V6.bits()
            | Self::NORMAL_IP_METHOD.bits()
            | Self::NORMAL_NETIF_KIND.bits()
            | Self::NORMAL_WIFI_STA.bits();
        const AP_DEV_IP = Self::AP_IP_ADDRESS.bits()
            | Self::AP_SUBNET_MASK.bits()
            | Self::AP_GATEWAY.bits()
            | Self::AP_DNS.bits();
        const AP_WIFI = Self::AP_SSID.bits()
            | Self::AP_PASSWORD.bits()
            | Self::AP_ENCRYPTION.bits()
            | Self::AP_CHANNEL.bits();
        const ACCESS_POINT = Self::AP_DEV_IP.bits() | Self::AP_WIFI.bits();
        const PROXY = Self::PROXY_URL.bits()
            | Self::PROXY_PORT.bits()
            | Self::PROXY_USERNAME.bits()
            | Self::PROXY_PASSWORD.bits();
    }
}

impl ParameterMask {
    /// Fields a connection in `mode` over `netif` depends on
    pub fn for_connect(mode: Mode, netif: NetifKind) -> Self {
        match (mode, netif) {
            (Mode::Normal, NetifKind::Ethernet) => {
                Self::NORMAL_DEV_IP
                    | Self::NORMAL_DEV_IP_V6
                    | Self::NORMAL_IP_METHOD
                    | Self::NORMAL_NETIF_KIND
            }
            (Mode::Normal, NetifKind::Wifi) => Self::NORMAL,
            (Mode::AccessPoint, _) => Self::ACCESS_POINT,
        }
    }
}

/// Sections of the record that can be saved or loaded on their own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterSection {
    Normal,
    AccessPoint,
    Proxy,
}

impl ParameterSection {
    pub fn mask(self) -> ParameterMask {
        match self {
            ParameterSection::Normal => ParameterMask::NORMAL,
            ParameterSection::AccessPoint => ParameterMask::ACCESS_POINT,
            ParameterSection::Proxy => ParameterMask::PROXY,
        }
    }
}

/// One section of the record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariantParameter {
    Normal(NormalParameter),
    AccessPoint(AccessPointParameter),
    Proxy(ProxyParameter),
}

impl VariantParameter {
    pub fn section(&self) -> ParameterSection {
        match self {
            VariantParameter::Normal(_) => ParameterSection::Normal,
            VariantParameter::AccessPoint(_) => ParameterSection::AccessPoint,
            VariantParameter::Proxy(_) => ParameterSection::Proxy,
        }
    }

    /// Place this section into an otherwise default record
    pub fn into_parameter(self) -> ConnectionParameter {
        let mut parameter = ConnectionParameter::default();
        match self {
            VariantParameter::Normal(normal) => parameter.normal = normal,
            VariantParameter::AccessPoint(ap) => parameter.access_point = ap,
            VariantParameter::Proxy(proxy) => parameter.proxy = proxy,
        }
        parameter
    }

    /// Extract `section` from a full record
    pub fn from_parameter(section: ParameterSection, parameter: ConnectionParameter) -> Self {
        match section {
            ParameterSection::Normal => VariantParameter::Normal(parameter.normal),
            ParameterSection::AccessPoint => VariantParameter::AccessPoint(parameter.access_point),
            ParameterSection::Proxy => VariantParameter::Proxy(parameter.proxy),
        }
    }
}
