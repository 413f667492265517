use std::fmt;

use serde::Deserialize;
use thiserror::Error;

/// Column names of one decoded status line, in frame order.
pub const FIELD_NAMES: [&str; 13] = [
    "Address",
    "Status",
    "UpvV",
    "IpvA",
    "PpvW",
    "UnV",
    "InA",
    "PnW",
    "TdeviceC",
    "EdailyWh",
    "Checksum",
    "DeviceType",
    "EtotalKwh",
];

/// Tokens a status line must carry, counting the address echo.
pub const MIN_TOKENS: usize = 12;

const CHECKSUM_TOKEN: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("no start marker in response")]
    NoStartMarker,
    #[error("address echo mismatch (expected {expected}, got {found})")]
    AddressMismatch { expected: String, found: String },
    #[error("truncated frame ({0} tokens, need at least {})", MIN_TOKENS)]
    TruncatedFrame(usize),
    #[error("unknown status code {0}")]
    UnknownStatusCode(String),
    #[error("checksum field {0:?} is not a single byte")]
    InvalidChecksum(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("bus address {0} outside 1..=99")]
pub struct InvalidAddress(pub u8);

/// Address of one inverter on the RS-485 bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub struct BusAddress(u8);

impl BusAddress {
    pub fn new(addr: u8) -> Result<Self, InvalidAddress> {
        if (1..=99).contains(&addr) {
            Ok(BusAddress(addr))
        } else {
            Err(InvalidAddress(addr))
        }
    }

    /// First token of a well-formed reply from this address, e.g. `*010`.
    pub fn echo_token(self) -> String {
        format!("*{self}0")
    }
}

impl TryFrom<u8> for BusAddress {
    type Error = InvalidAddress;

    fn try_from(addr: u8) -> Result<Self, Self::Error> {
        BusAddress::new(addr)
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

/// Operating state reported in the second field of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Start,
    SelfTest,
    Shutdown,
    ConstantVoltage,
    MppTrack,
    MppNoTrack,
    WaitFeedIn,
    WaitSelfTest,
    TestRelays,
    OverTemperature,
    ExcessPower,
    OverloadShutdown,
    OvervoltsShutdown,
    GridFail,
    Night,
    RcdShutdown,
    InsulationError,
    MeasureError,
    RcdError,
    SelfTestError,
    FeedinError,
    CommsError,
    NoResponse,
}

impl StatusCode {
    pub fn from_code(code: i32) -> Option<Self> {
        use StatusCode::*;
        let status = match code {
            0 => Start,
            1 => SelfTest,
            2 => Shutdown,
            3 => ConstantVoltage,
            4 => MppTrack,
            5 => MppNoTrack,
            6 => WaitFeedIn,
            7 => WaitSelfTest,
            8 => TestRelays,
            10 => OverTemperature,
            11 => ExcessPower,
            12 => OverloadShutdown,
            13 => OvervoltsShutdown,
            14 => GridFail,
            15 => Night,
            18 => RcdShutdown,
            19 => InsulationError,
            30 => MeasureError,
            31 => RcdError,
            32 => SelfTestError,
            33 => FeedinError,
            34 => CommsError,
            -999 => NoResponse,
            _ => return None,
        };
        Some(status)
    }

    /// Looks up a status token exactly as sent; `"00"` or `"+1"` are not codes.
    pub fn from_token(token: &str) -> Option<Self> {
        token
            .parse::<i32>()
            .ok()
            .filter(|code| code.to_string() == token)
            .and_then(StatusCode::from_code)
    }

    pub fn code(self) -> i32 {
        use StatusCode::*;
        match self {
            Start => 0,
            SelfTest => 1,
            Shutdown => 2,
            ConstantVoltage => 3,
            MppTrack => 4,
            MppNoTrack => 5,
            WaitFeedIn => 6,
            WaitSelfTest => 7,
            TestRelays => 8,
            OverTemperature => 10,
            ExcessPower => 11,
            OverloadShutdown => 12,
            OvervoltsShutdown => 13,
            GridFail => 14,
            Night => 15,
            RcdShutdown => 18,
            InsulationError => 19,
            MeasureError => 30,
            RcdError => 31,
            SelfTestError => 32,
            FeedinError => 33,
            CommsError => 34,
            NoResponse => -999,
        }
    }

    pub fn label(self) -> &'static str {
        use StatusCode::*;
        match self {
            Start => "start",
            SelfTest => "self-test",
            Shutdown => "shutdown",
            ConstantVoltage => "constant voltage",
            MppTrack => "mpp-track",
            MppNoTrack => "mpp-no-track",
            WaitFeedIn => "wait-feed-in",
            WaitSelfTest => "wait-self-test",
            TestRelays => "test-relays",
            OverTemperature => "over-temperature",
            ExcessPower => "excess-power",
            OverloadShutdown => "overload-shutdown",
            OvervoltsShutdown => "overvolts-shutdown",
            GridFail => "grid-fail",
            Night => "night",
            RcdShutdown => "RCD-shutdown",
            InsulationError => "insulation-error",
            MeasureError => "measure-error",
            RcdError => "RCD-error",
            SelfTestError => "self-test error",
            FeedinError => "feedin-error",
            CommsError => "comms-error",
            NoResponse => "no-response",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}_{}", self.code(), self.label())
    }
}

/// Bytes collected from the bus for one request, decoded as Latin-1 so
/// every byte value survives as exactly one `char`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawResponse(String);

impl RawResponse {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        RawResponse(bytes.iter().map(|&b| char::from(b)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RawResponse {
    fn from(s: &str) -> Self {
        RawResponse(s.to_owned())
    }
}

/// One validated status line. Measured values are kept verbatim as the
/// inverter formatted them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InverterRecord {
    pub address: BusAddress,
    pub status: StatusCode,
    pub input_voltage: String,
    pub input_current: String,
    pub input_power: String,
    pub output_voltage: String,
    pub output_current: String,
    pub output_power: String,
    pub temperature: String,
    pub daily_energy: String,
    pub checksum: u8,
    pub device_type: String,
    /// Missing when the inverter sends the 12 token minimum.
    pub total_energy: Option<String>,
}

impl InverterRecord {
    pub fn parse(raw: &RawResponse, address: BusAddress) -> Result<Self, ParseError> {
        let start = raw.as_str().find('*').ok_or(ParseError::NoStartMarker)?;
        let tokens: Vec<&str> = raw.as_str()[start..].split_whitespace().collect();

        let expected = address.echo_token();
        let found = tokens.first().copied().unwrap_or_default();
        if found != expected {
            return Err(ParseError::AddressMismatch {
                expected,
                found: found.to_owned(),
            });
        }

        if tokens.len() < MIN_TOKENS {
            return Err(ParseError::TruncatedFrame(tokens.len()));
        }

        let status = StatusCode::from_token(tokens[1])
            .ok_or_else(|| ParseError::UnknownStatusCode(tokens[1].to_owned()))?;
        let checksum = decode_checksum(tokens[CHECKSUM_TOKEN])?;

        Ok(InverterRecord {
            address,
            status,
            input_voltage: tokens[2].to_owned(),
            input_current: tokens[3].to_owned(),
            input_power: tokens[4].to_owned(),
            output_voltage: tokens[5].to_owned(),
            output_current: tokens[6].to_owned(),
            output_power: tokens[7].to_owned(),
            temperature: tokens[8].to_owned(),
            daily_energy: tokens[9].to_owned(),
            checksum,
            device_type: tokens[11].to_owned(),
            total_energy: tokens.get(12).map(|t| (*t).to_owned()),
        })
    }

    /// All 13 fields in log column order; a missing total is empty.
    pub fn fields(&self) -> [String; 13] {
        [
            self.address.to_string(),
            self.status.to_string(),
            self.input_voltage.clone(),
            self.input_current.clone(),
            self.input_power.clone(),
            self.output_voltage.clone(),
            self.output_current.clone(),
            self.output_power.clone(),
            self.temperature.clone(),
            self.daily_energy.clone(),
            self.checksum.to_string(),
            self.device_type.clone(),
            self.total_energy.clone().unwrap_or_default(),
        ]
    }
}

fn decode_checksum(token: &str) -> Result<u8, ParseError> {
    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => {
            u8::try_from(u32::from(c)).map_err(|_| ParseError::InvalidChecksum(token.to_owned()))
        }
        _ => Err(ParseError::InvalidChecksum(token.to_owned())),
    }
}
