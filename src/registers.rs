//! The catalog of registers known to exist on the SC3 controller.
//!
//! All of the data lives in the `for_each_register!` table below, from which the individual
//! per-column lists are generated. Register definitions are assembled from these lists by
//! [`RegisterIndex::definition`].

use crate::schema::RegisterDefinition;
use crate::units::Unit;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(transparent)]
pub struct Mode(u8);

impl serde::Serialize for Mode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.0 & Self::R.0 == 0 { "-" } else { "R" })?;
        f.write_str(if self.0 & Self::W.0 == 0 { "-" } else { "W" })?;
        Ok(())
    }
}

impl Mode {
    pub const R: Self = Self(1 << 0);
    pub const W: Self = Self(1 << 1);
    pub const RW: Self = Self(Self::R.0 | Self::W.0);
    const R_: Self = Self::R;

    pub const fn is_readable(&self) -> bool {
        self.0 & Self::R.0 != 0
    }

    pub const fn is_writable(&self) -> bool {
        self.0 & Self::W.0 != 0
    }
}

// Convenience aliases for the nicely tabulated `for_each_register` macro definition below.
const RAW: Option<Unit> = None;
const TMP: Option<Unit> = Some(Unit::Temperature);
const VOL: Option<Unit> = Some(Unit::VolumeFlow);
const VLT: Option<Unit> = Some(Unit::Voltage);
const PCT: Option<Unit> = Some(Unit::PERCENTAGE);
const PWM: Option<Unit> = Some(Unit::PwmPercentage);
const AMP: Option<Unit> = Some(Unit::Current);
const CIR: Option<Unit> = Some(Unit::CIRCULATION);
const AOM: Option<Unit> = Some(Unit::ANALOG_OUT);
const FLT: Option<Unit> = Some(Unit::FAULTS);

/// Position of a register within the static catalog.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RegisterIndex(usize);

impl RegisterIndex {
    pub const fn from_address(address: u16) -> Option<RegisterIndex> {
        let (mut low, mut high) = (0, ADDRESSES.len());
        while low < high {
            let middle = low + (high - low) / 2;
            if ADDRESSES[middle] < address {
                low = middle + 1;
            } else {
                high = middle;
            }
        }
        if low < ADDRESSES.len() && ADDRESSES[low] == address {
            Some(Self(low))
        } else {
            None
        }
    }

    const fn known(address: u16) -> Self {
        match Self::from_address(address) {
            Some(index) => index,
            None => panic!("register is missing from the catalog"),
        }
    }

    pub fn all() -> impl Iterator<Item = RegisterIndex> {
        (0..ADDRESSES.len()).map(Self)
    }

    pub fn address(&self) -> u16 {
        ADDRESSES[self.0]
    }

    pub fn name(&self) -> &'static str {
        NAMES[self.0]
    }

    pub fn definition(&self) -> RegisterDefinition {
        RegisterDefinition {
            address: ADDRESSES[self.0],
            name: NAMES[self.0],
            description: DESCRIPTIONS[self.0],
            mode: MODES[self.0],
            length: 1,
            minimum: MINIMUM_VALUES[self.0],
            maximum: MAXIMUM_VALUES[self.0],
            unit: UNITS[self.0],
        }
    }
}

macro_rules! for_each_register {
    ($m:ident) => {
        $m! {
            0: RAW, RW, SETUP_1, "Setup 1", min = 0, max = 3;
            1: RAW, RW, SETUP_2, "Setup 2", min = 0, max = 3;
            2049: CIR, RW, CIRCULATION_MODE, "Circulation operating mode", min = 0, max = 3;
            3840: AOM, RW, ANALOG_OUT_1_STATUS, "Analog output 1 status", min = 0, max = 3;
            3845: AOM, RW, ANALOG_OUT_2_STATUS, "Analog output 2 status", min = 0, max = 3;
            3850: AOM, RW, ANALOG_OUT_3_STATUS, "Analog output 3 status", min = 0, max = 3;
            3855: AOM, RW, ANALOG_OUT_4_STATUS, "Analog output 4 status", min = 0, max = 3;
            3860: AOM, RW, ANALOG_OUT_5_STATUS, "Analog output 5 status", min = 0, max = 3;
            3865: AOM, RW, ANALOG_OUT_6_STATUS, "Analog output 6 status", min = 0, max = 3;
            33024: TMP, R_, TEMP_S1, "Temperature S1 (storage tank top)";
            33025: TMP, R_, TEMP_S2, "Temperature S2 (hot water)";
            33026: TMP, R_, TEMP_S3, "Temperature S3 (storage tank reference)";
            33027: TMP, R_, TEMP_S4, "Temperature S4 (heating buffer top)";
            33028: TMP, R_, TEMP_S5, "Temperature S5 (solar flow)";
            33029: TMP, R_, TEMP_S6, "Temperature S6 (solar return)";
            33030: TMP, R_, TEMP_S7, "Temperature S7 (solar pressure)";
            33031: TMP, R_, TEMP_S8, "Temperature S8 (solar collector)";
            33032: TMP, R_, TEMP_S9, "Temperature S9 (heating buffer bottom)";
            33033: TMP, R_, TEMP_S10, "Temperature S10 (outdoor)";
            33034: TMP, R_, TEMP_S11, "Temperature S11 (circulation)";
            33035: TMP, R_, TEMP_S12, "Temperature S12 (heating circuit 1 flow)";
            33036: TMP, R_, TEMP_S13, "Temperature S13 (heating circuit 2 flow)";
            33037: TMP, R_, TEMP_S14, "Temperature S14 (heating circuit 3 flow)";
            33038: TMP, R_, TEMP_S15, "Temperature S15 (cold water)";
            33039: TMP, R_, TEMP_S16, "Temperature S16 (unassigned)";
            33040: VOL, R_, VOLUME_FLOW_S17, "Volume flow S17 (solar circuit)", min = 0, max = 2000;
            33041: VOL, R_, VOLUME_FLOW_S18, "Volume flow S18 (hot water)", min = 0, max = 2000;
            33042: VLT, R_, ANALOG_IN_1, "Analog input 1", min = 0, max = 100;
            33043: VLT, R_, ANALOG_IN_2, "Analog input 2", min = 0, max = 100;
            33044: VLT, R_, ANALOG_IN_3, "Analog input 3", min = 0, max = 100;
            33045: FLT, R_, DIGIN_FAULTS, "Digital input faults";
            33280: PWM, R_, OUTPUT_A1, "Output A1";
            33281: PWM, R_, OUTPUT_A2, "Output A2";
            33282: PWM, R_, OUTPUT_A3, "Output A3";
            33283: PWM, R_, OUTPUT_A4, "Output A4";
            33284: PWM, R_, OUTPUT_A5, "Output A5";
            33285: PWM, R_, OUTPUT_A6, "Output A6";
            33286: PWM, R_, OUTPUT_A7, "Output A7";
            33287: PWM, R_, OUTPUT_A8, "Output A8";
            33288: PWM, R_, OUTPUT_A9, "Output A9";
            33289: PWM, R_, OUTPUT_A10, "Output A10";
            33290: PWM, R_, OUTPUT_A11, "Output A11";
            33291: PWM, R_, OUTPUT_A12, "Output A12";
            33292: PWM, R_, OUTPUT_A13, "Output A13";
            33293: PWM, R_, OUTPUT_A14, "Output A14";
            33294: VLT, R_, ANALOG_OUT_O1, "Analog output O1", min = 0, max = 100;
            33295: VLT, R_, ANALOG_OUT_O2, "Analog output O2", min = 0, max = 100;
            33296: VLT, R_, ANALOG_OUT_O3, "Analog output O3", min = 0, max = 100;
            33297: VLT, R_, ANALOG_OUT_O4, "Analog output O4", min = 0, max = 100;
            33298: VLT, R_, ANALOG_OUT_O5, "Analog output O5", min = 0, max = 100;
            33299: VLT, R_, ANALOG_OUT_O6, "Analog output O6", min = 0, max = 100;
            33536: RAW, R_, BURNER_RUNTIME, "Burner runtime in hours";
            33537: RAW, R_, BURNER_STARTS, "Burner start count";
            33538: PCT, R_, BURNER_POWER, "Current burner power", min = 0, max = 10000;
            33540: AMP, R_, IONISATION_CURRENT, "Ionisation current";
            33792: RAW, R_, MESSAGE_1_CODE, "Message 1 code";
            33793: RAW, R_, MESSAGE_1_TIMESTAMP, "Message 1 timestamp";
            33794: RAW, R_, MESSAGE_1_PARAM_1, "Message 1 parameter 1";
            33795: RAW, R_, MESSAGE_1_PARAM_2, "Message 1 parameter 2";
            33796: RAW, R_, MESSAGE_2_CODE, "Message 2 code";
            33797: RAW, R_, MESSAGE_2_TIMESTAMP, "Message 2 timestamp";
            33798: RAW, R_, MESSAGE_2_PARAM_1, "Message 2 parameter 1";
            33799: RAW, R_, MESSAGE_2_PARAM_2, "Message 2 parameter 2";
            33800: RAW, R_, MESSAGE_3_CODE, "Message 3 code";
            33801: RAW, R_, MESSAGE_3_TIMESTAMP, "Message 3 timestamp";
            33802: RAW, R_, MESSAGE_3_PARAM_1, "Message 3 parameter 1";
            33803: RAW, R_, MESSAGE_3_PARAM_2, "Message 3 parameter 2";
            33804: RAW, R_, MESSAGE_4_CODE, "Message 4 code";
            33805: RAW, R_, MESSAGE_4_TIMESTAMP, "Message 4 timestamp";
            33806: RAW, R_, MESSAGE_4_PARAM_1, "Message 4 parameter 1";
            33807: RAW, R_, MESSAGE_4_PARAM_2, "Message 4 parameter 2";
            33808: RAW, R_, MESSAGE_5_CODE, "Message 5 code";
            33809: RAW, R_, MESSAGE_5_TIMESTAMP, "Message 5 timestamp";
            33810: RAW, R_, MESSAGE_5_PARAM_1, "Message 5 parameter 1";
            33811: RAW, R_, MESSAGE_5_PARAM_2, "Message 5 parameter 2";
            33812: RAW, R_, MESSAGE_6_CODE, "Message 6 code";
            33813: RAW, R_, MESSAGE_6_TIMESTAMP, "Message 6 timestamp";
            33814: RAW, R_, MESSAGE_6_PARAM_1, "Message 6 parameter 1";
            33815: RAW, R_, MESSAGE_6_PARAM_2, "Message 6 parameter 2";
            33816: RAW, R_, MESSAGE_7_CODE, "Message 7 code";
            33817: RAW, R_, MESSAGE_7_TIMESTAMP, "Message 7 timestamp";
            33818: RAW, R_, MESSAGE_7_PARAM_1, "Message 7 parameter 1";
            33819: RAW, R_, MESSAGE_7_PARAM_2, "Message 7 parameter 2";
            33820: RAW, R_, MESSAGE_8_CODE, "Message 8 code";
            33821: RAW, R_, MESSAGE_8_TIMESTAMP, "Message 8 timestamp";
            33822: RAW, R_, MESSAGE_8_PARAM_1, "Message 8 parameter 1";
            33823: RAW, R_, MESSAGE_8_PARAM_2, "Message 8 parameter 2";
            33824: RAW, R_, MESSAGE_9_CODE, "Message 9 code";
            33825: RAW, R_, MESSAGE_9_TIMESTAMP, "Message 9 timestamp";
            33826: RAW, R_, MESSAGE_9_PARAM_1, "Message 9 parameter 1";
            33827: RAW, R_, MESSAGE_9_PARAM_2, "Message 9 parameter 2";
            33828: RAW, R_, MESSAGE_10_CODE, "Message 10 code";
            33829: RAW, R_, MESSAGE_10_TIMESTAMP, "Message 10 timestamp";
            33830: RAW, R_, MESSAGE_10_PARAM_1, "Message 10 parameter 1";
            33831: RAW, R_, MESSAGE_10_PARAM_2, "Message 10 parameter 2";
        }
    };
}

macro_rules! optional {
    () => {
        None
    };
    ($($lit: tt)+) => {
        Some($($lit)*)
    };
}

macro_rules! make_lists {
    ($($regnum: literal: $unit: ident, $mode: ident, $name: ident, $description: literal
       $(, min = $min: literal)? $(, max = $max: literal)?;)+) => {
        pub static ADDRESSES: &[u16] = &[$($regnum),*];
        pub static NAMES: &[&str] = &[$(stringify!($name)),*];
        pub static DESCRIPTIONS: &[&str] = &[$($description),*];
        pub static MODES: &[Mode] = &[$(Mode::$mode),*];
        pub static UNITS: &[Option<Unit>] = &[$($unit),*];
        /// Inclusive lower bounds, in raw register units.
        pub static MINIMUM_VALUES: &[Option<i32>] = &[$(optional!($($min)?)),*];
        /// Inclusive upper bounds, in raw register units.
        pub static MAXIMUM_VALUES: &[Option<i32>] = &[$(optional!($($max)?)),*];

        impl RegisterIndex {
            $(pub const $name: Self = Self::known($regnum);)+
        }
    };
}

for_each_register!(make_lists);

const _ASSERT_ADDRESSES_SORTED: () = const {
    let mut index = 1;
    while index < ADDRESSES.len() {
        if ADDRESSES[index] <= ADDRESSES[index - 1] {
            panic!("ADDRESSES is not sorted (or has duplicate values)!");
        }
        index += 1;
    }
};
