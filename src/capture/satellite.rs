use serde::Serialize;
use utoipa::ToSchema;

/// A NOAA APT bird: common name, NORAD catalog number, and downlink
/// frequency in hertz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct Satellite {
    #[schema(value_type = String)]
    pub name: &'static str,
    pub norad_id: u32,
    pub freq_hz: u64,
}

/// The catalog of active NOAA APT satellites. All three transmit in the
/// 137 MHz VHF band.
pub const SATELLITES: [Satellite; 3] = [
    Satellite {
        name: "NOAA-15",
        norad_id: 25338,
        freq_hz: 137_620_000,
    },
    Satellite {
        name: "NOAA-18",
        norad_id: 28654,
        freq_hz: 137_912_500,
    },
    Satellite {
        name: "NOAA-19",
        norad_id: 33591,
        freq_hz: 137_100_000,
    },
];

/// Look up a satellite by NORAD catalog number.
pub fn by_norad_id(id: u32) -> Option<&'static Satellite> {
    SATELLITES.iter().find(|s| s.norad_id == id)
}

/// Look up a satellite by name, case-insensitively.
pub fn by_name(name: &str) -> Option<&'static Satellite> {
    SATELLITES.iter().find(|s| s.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_norad_id() {
        assert_eq!(by_norad_id(33591).unwrap().name, "NOAA-19");
        assert!(by_norad_id(99999).is_none());
    }

    #[test]
    fn lookup_by_name_is_case_insensitive() {
        assert_eq!(by_name("noaa-18").unwrap().norad_id, 28654);
        assert!(by_name("METEOR-M2").is_none());
    }
}
