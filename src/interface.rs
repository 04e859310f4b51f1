use clap::ValueEnum;

use crate::constants::DEFAULT_BAUD;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum InterfaceMode {
    #[default]
    Serial,
    Simulation,
}

impl InterfaceMode {
    pub const fn default_baud(self) -> u32 {
        match self {
            Self::Serial | Self::Simulation => DEFAULT_BAUD,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Serial => "LIVE",
            Self::Simulation => "SIM",
        }
    }
}

/// Gas selector sent in the low data byte of flow-measurement requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum GasKind {
    #[default]
    Co2,
    Air,
}

impl GasKind {
    pub const fn selector(self) -> u16 {
        match self {
            Self::Co2 => 1,
            Self::Air => 0,
        }
    }
}
