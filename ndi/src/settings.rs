//! Serial link parameter encoding for the `COMM` command
//!
//! The tracker boots at 9600-8-N-1 without flow control. The host sends
//! `COMM <baud><char><parity><stop><flow>` (five digits) and, once the
//! device acknowledges, reconfigures its own side of the link to match.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaudRate {
    Baud9600,
    Baud19200,
    Baud38400,
    Baud57600,
    Baud115200,
}

impl BaudRate {
    pub fn bits_per_second(self) -> u32 {
        match self {
            BaudRate::Baud9600 => 9_600,
            BaudRate::Baud19200 => 19_200,
            BaudRate::Baud38400 => 38_400,
            BaudRate::Baud57600 => 57_600,
            BaudRate::Baud115200 => 115_200,
        }
    }

    fn code(self) -> char {
        match self {
            BaudRate::Baud9600 => '0',
            BaudRate::Baud19200 => '2',
            BaudRate::Baud38400 => '3',
            BaudRate::Baud57600 => '4',
            BaudRate::Baud115200 => '5',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacterSize {
    Eight,
    Seven,
}

impl CharacterSize {
    fn code(self) -> char {
        match self {
            CharacterSize::Eight => '0',
            CharacterSize::Seven => '1',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl Parity {
    fn code(self) -> char {
        match self {
            Parity::None => '0',
            Parity::Odd => '1',
            Parity::Even => '2',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

impl StopBits {
    fn code(self) -> char {
        match self {
            StopBits::One => '0',
            StopBits::Two => '1',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    None,
    Hardware,
}

impl FlowControl {
    fn code(self) -> char {
        match self {
            FlowControl::None => '0',
            FlowControl::Hardware => '1',
        }
    }
}

/// One full set of link parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSettings {
    pub baud: BaudRate,
    pub character_size: CharacterSize,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
}

impl LinkSettings {
    /// Parameters the device uses after a reset.
    pub fn reset_default() -> Self {
        Self {
            baud: BaudRate::Baud9600,
            character_size: CharacterSize::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }

    /// Parameters negotiated for steady operation.
    pub fn full_speed() -> Self {
        Self {
            baud: BaudRate::Baud115200,
            ..Self::reset_default()
        }
    }

    /// The five-digit argument of the `COMM` command.
    pub fn comm_argument(&self) -> String {
        [
            self.baud.code(),
            self.character_size.code(),
            self.parity.code(),
            self.stop_bits.code(),
            self.flow_control.code(),
        ]
        .iter()
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_speed_encoding() {
        assert_eq!(LinkSettings::full_speed().comm_argument(), "50000");
    }

    #[test]
    fn test_reset_default_encoding() {
        assert_eq!(LinkSettings::reset_default().comm_argument(), "00000");
    }

    #[test]
    fn test_exotic_encoding() {
        let settings = LinkSettings {
            baud: BaudRate::Baud19200,
            character_size: CharacterSize::Seven,
            parity: Parity::Even,
            stop_bits: StopBits::Two,
            flow_control: FlowControl::Hardware,
        };
        assert_eq!(settings.comm_argument(), "21211");
    }
}
