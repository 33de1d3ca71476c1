//! AVR device definitions, the memory map of each supported part
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Device family, sharing one register map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Family {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(deserialize_with = "parse_address")]
    pub flash_start: u16,
    #[serde(deserialize_with = "parse_address")]
    pub syscfg_address: u16,
    #[serde(deserialize_with = "parse_address")]
    pub nvmctrl_address: u16,
    #[serde(deserialize_with = "parse_address")]
    pub sigrow_address: u16,
    #[serde(deserialize_with = "parse_address")]
    pub fuses_address: u16,
    #[serde(deserialize_with = "parse_address")]
    pub userrow_address: u16,
    pub fuses_count: u8,
    pub variants: Vec<Variant>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    /// Part name, `x` stands for any character
    pub name: String,
    #[serde(deserialize_with = "parse_address_and_offset")]
    pub flash_size: u32,
    pub page_size: u16,
}

/// Represents one supported part, with its family's register map resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub name: String,
    pub family: String,
    pub flash_start: u16,
    pub flash_size: u32,
    pub page_size: u16,
    pub syscfg_address: u16,
    pub nvmctrl_address: u16,
    pub sigrow_address: u16,
    pub fuses_address: u16,
    pub userrow_address: u16,
    pub fuses_count: u8,
}

impl ::std::fmt::Display for Device {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        write!(
            f,
            "{} (Flash: {}KiB @ 0x{:04X}, page {} bytes)",
            self.name,
            self.flash_size / 1024,
            self.flash_start,
            self.page_size
        )
    }
}

impl Device {
    fn resolve(family: &Family, variant: &Variant) -> Self {
        Device {
            name: variant.name.clone(),
            family: family.name.clone(),
            flash_start: family.flash_start,
            flash_size: variant.flash_size,
            page_size: variant.page_size,
            syscfg_address: family.syscfg_address,
            nvmctrl_address: family.nvmctrl_address,
            sigrow_address: family.sigrow_address,
            fuses_address: family.fuses_address,
            userrow_address: family.userrow_address,
            fuses_count: family.fuses_count,
        }
    }

    /// Number of pages covering `len` bytes, the last one may be short
    pub fn pages(&self, len: usize) -> usize {
        len.div_ceil(usize::from(self.page_size.max(1)))
    }
}

pub struct DeviceDB {
    families: Vec<Family>,
}

impl DeviceDB {
    pub fn load() -> Result<Self> {
        Ok(DeviceDB {
            families: vec![
                serde_yaml::from_str(include_str!("../devices/megaAVR-0.yaml"))?,
                serde_yaml::from_str(include_str!("../devices/AVR-Dx.yaml"))?,
                serde_yaml::from_str(include_str!("../devices/tinyAVR.yaml"))?,
            ],
        })
    }

    /// Look a part up by name. Exact names win, then names where `x` stands
    /// for any character (`tiny817` finds `tiny81x`). Case-insensitive.
    pub fn find(name: &str) -> Result<Device> {
        DeviceDB::load()?.lookup(name)
    }

    pub fn lookup(&self, name: &str) -> Result<Device> {
        let variants = || {
            self.families
                .iter()
                .flat_map(|f| f.variants.iter().map(move |v| (f, v)))
        };
        let (family, variant) = variants()
            .find(|(_, v)| v.name.eq_ignore_ascii_case(name))
            .or_else(|| variants().find(|(_, v)| name_matches(&v.name, name)))
            .ok_or_else(|| Error::UnknownDevice(name.to_string()))?;

        log::debug!("Found device {} in family {}", variant.name, family.name);
        if !variant.name.eq_ignore_ascii_case(name) {
            log::debug!("{} matched as {}", name, variant.name);
        }
        Ok(Device::resolve(family, variant))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.families
            .iter()
            .flat_map(|f| f.variants.iter().map(|v| v.name.as_str()))
    }

    pub fn families(&self) -> &[Family] {
        &self.families
    }
}

fn name_matches(pattern: &str, name: &str) -> bool {
    pattern.len() == name.len()
        && pattern
            .chars()
            .zip(name.chars())
            .all(|(p, c)| p == 'x' || p.eq_ignore_ascii_case(&c))
}

fn parse_number(s: &str) -> Option<u32> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else if let Some(k) = s
        .strip_suffix("KiB")
        .or_else(|| s.strip_suffix("KB"))
        .or_else(|| s.strip_suffix('K'))
    {
        k.trim().parse::<u32>().ok().map(|k| k * 1024)
    } else {
        // parse pure digits here
        s.parse().ok()
    }
}

fn parse_address_and_offset<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = serde::Deserialize::deserialize(deserializer)?;
    parse_number(&s)
        .ok_or_else(|| serde::de::Error::custom(format!("error while parsing {:?}", s)))
}

fn parse_address<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = parse_address_and_offset(deserializer)?;
    u16::try_from(value)
        .map_err(|_| serde::de::Error::custom(format!("address 0x{:X} exceeds 16 bits", value)))
}
