pub mod labels;
pub mod readings;
pub mod sample;

pub use labels::{GridPulseLabels, GridPulseLabelsExt};
pub use readings::{
    Alert, BatteryReading, EnvironmentalReading, InverterKind, InverterReading, MeterReading,
    SolarReading, SystemStatus,
};
pub use sample::{DataPoint, Sample};
