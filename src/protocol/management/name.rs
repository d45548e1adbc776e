//! ISO 11783-5 NAME field implementation (64 bits). The NAME uniquely
//! identifies a control function on the network and decides every address
//! contest: the numerically lower NAME wins. The module provides a typed
//! wrapper around the raw `u64` plus a saturating builder and the field
//! filters partners use to recognize a device.
//!
//! # Bit layout (from the least-significant bit)
//!
//! ```text
//! Bits  0-20  (21 bits) : Identity number
//! Bits 21-31  (11 bits) : Manufacturer code
//! Bits 32-34  ( 3 bits) : ECU instance
//! Bits 35-39  ( 5 bits) : Function instance
//! Bits 40-47  ( 8 bits) : Function code
//! Bit  48     ( 1 bit ) : Reserved
//! Bits 49-55  ( 7 bits) : Device class
//! Bits 56-59  ( 4 bits) : Device class instance
//! Bits 60-62  ( 3 bits) : Industry group
//! Bit  63     ( 1 bit ) : Self-configurable address
//! ```
use core::fmt;

/// Wrapper around the ISO 11783 NAME field (64 bits).
///
/// Immutable once constructed. Ordering is numeric: a lower raw value is a
/// higher claim priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Name(u64);

impl Name {
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(&self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn builder() -> NameBuilder {
        NameBuilder::new()
    }

    /// Identity number (bits 0-20).
    #[inline]
    pub const fn identity_number(&self) -> u32 {
        (self.0 & 0x1F_FFFF) as u32
    }

    /// Manufacturer code (bits 21-31).
    #[inline]
    pub const fn manufacturer_code(&self) -> u16 {
        ((self.0 >> 21) & 0x7FF) as u16
    }

    /// ECU instance (bits 32-34).
    #[inline]
    pub const fn ecu_instance(&self) -> u8 {
        ((self.0 >> 32) & 0x07) as u8
    }

    /// Function instance (bits 35-39).
    #[inline]
    pub const fn function_instance(&self) -> u8 {
        ((self.0 >> 35) & 0x1F) as u8
    }

    /// Function code (bits 40-47).
    #[inline]
    pub const fn function_code(&self) -> u8 {
        ((self.0 >> 40) & 0xFF) as u8
    }

    /// Reserved bit (bit 48).
    #[inline]
    pub const fn reserved(&self) -> bool {
        ((self.0 >> 48) & 0x01) != 0
    }

    /// Device class (bits 49-55).
    #[inline]
    pub const fn device_class(&self) -> u8 {
        ((self.0 >> 49) & 0x7F) as u8
    }

    /// Device class instance (bits 56-59).
    #[inline]
    pub const fn device_class_instance(&self) -> u8 {
        ((self.0 >> 56) & 0x0F) as u8
    }

    /// Industry group (bits 60-62). `2` is agricultural equipment.
    #[inline]
    pub const fn industry_group(&self) -> u8 {
        ((self.0 >> 60) & 0x07) as u8
    }

    /// Self-configurable-address bit (bit 63): whether the device may move
    /// into the 0x80-0xF7 range when it loses a contest.
    #[inline]
    pub const fn is_self_configurable(&self) -> bool {
        ((self.0 >> 63) & 0x01) != 0
    }

    /// Little-endian wire form carried by an address-claim payload.
    #[inline]
    pub const fn to_le_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub const fn from_le_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }
}

impl From<u64> for Name {
    #[inline]
    fn from(raw: u64) -> Self {
        Self::from_raw(raw)
    }
}

impl From<Name> for u64 {
    #[inline]
    fn from(name: Name) -> Self {
        name.raw()
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Name {{ identity: {}, mfg: {}, func: {}, class: {}, ig: {}, self-cfg: {} }}",
            self.identity_number(),
            self.manufacturer_code(),
            self.function_code(),
            self.device_class(),
            self.industry_group(),
            self.is_self_configurable()
        )
    }
}

/// Fluent builder for a [`Name`].
///
/// Oversized field values saturate to the field mask rather than erroring:
/// a NAME is assembled from configuration long before any bus traffic
/// exists, and a hard failure there masks the real mistake. The clamp is
/// reported through the logging facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameBuilder {
    raw: u64,
}

impl NameBuilder {
    #[inline]
    pub const fn new() -> Self {
        Self { raw: 0 }
    }

    fn set_field(&mut self, shift: u32, mask: u64, value: u64, field: &'static str) {
        let clamped = if value > mask {
            log::warn!("NAME field {field} value {value} exceeds {mask}; saturating");
            mask
        } else {
            value
        };
        self.raw = (self.raw & !(mask << shift)) | (clamped << shift);
    }

    pub fn identity_number(mut self, value: u32) -> Self {
        self.set_field(0, 0x1F_FFFF, u64::from(value), "identity_number");
        self
    }

    pub fn manufacturer_code(mut self, value: u16) -> Self {
        self.set_field(21, 0x7FF, u64::from(value), "manufacturer_code");
        self
    }

    pub fn ecu_instance(mut self, value: u8) -> Self {
        self.set_field(32, 0x07, u64::from(value), "ecu_instance");
        self
    }

    pub fn function_instance(mut self, value: u8) -> Self {
        self.set_field(35, 0x1F, u64::from(value), "function_instance");
        self
    }

    pub fn function_code(mut self, value: u8) -> Self {
        self.set_field(40, 0xFF, u64::from(value), "function_code");
        self
    }

    pub fn device_class(mut self, value: u8) -> Self {
        self.set_field(49, 0x7F, u64::from(value), "device_class");
        self
    }

    pub fn device_class_instance(mut self, value: u8) -> Self {
        self.set_field(56, 0x0F, u64::from(value), "device_class_instance");
        self
    }

    pub fn industry_group(mut self, value: u8) -> Self {
        self.set_field(60, 0x07, u64::from(value), "industry_group");
        self
    }

    pub fn self_configurable(mut self, value: bool) -> Self {
        self.raw = (self.raw & !(1 << 63)) | ((value as u64) << 63);
        self
    }

    #[inline]
    pub const fn build(self) -> Name {
        Name(self.raw)
    }
}

/// NAME field a partner filter can match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NameFilterField {
    IdentityNumber,
    ManufacturerCode,
    EcuInstance,
    FunctionInstance,
    FunctionCode,
    DeviceClass,
    DeviceClassInstance,
    IndustryGroup,
}

/// One predicate over a single NAME field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NameFilter {
    pub field: NameFilterField,
    pub value: u32,
}

impl NameFilter {
    pub const fn new(field: NameFilterField, value: u32) -> Self {
        Self { field, value }
    }

    pub fn matches(&self, name: Name) -> bool {
        let actual = match self.field {
            NameFilterField::IdentityNumber => name.identity_number(),
            NameFilterField::ManufacturerCode => u32::from(name.manufacturer_code()),
            NameFilterField::EcuInstance => u32::from(name.ecu_instance()),
            NameFilterField::FunctionInstance => u32::from(name.function_instance()),
            NameFilterField::FunctionCode => u32::from(name.function_code()),
            NameFilterField::DeviceClass => u32::from(name.device_class()),
            NameFilterField::DeviceClassInstance => u32::from(name.device_class_instance()),
            NameFilterField::IndustryGroup => u32::from(name.industry_group()),
        };
        actual == self.value
    }
}

/// AND-combination of filters; an empty set matches every NAME.
pub fn matches_all(filters: &[NameFilter], name: Name) -> bool {
    filters.iter().all(|filter| filter.matches(name))
}

#[cfg(test)]
#[path = "name_tests.rs"]
mod tests;
