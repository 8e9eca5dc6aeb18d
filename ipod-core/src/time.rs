//! Device timestamps and fuzzy mtime comparison

use chrono::Local;

/// Seconds between the device reference epoch (1904-01-01) and the Unix
/// epoch.
const MAC_TIME_OFFSET: i64 = 2_082_844_800;

/// Local-time context frozen for one generation run.
///
/// The device stores timestamps shifted by the writing machine's UTC offset,
/// sampled once per run: whether daylight saving applies is decided by the
/// current run, not by the date of the timestamp being converted.
#[derive(Debug, Clone, Copy)]
pub struct MacTime {
    utc_offset_secs: i64,
}

impl MacTime {
    /// Capture the machine's current UTC offset.
    pub fn local() -> Self {
        Self {
            utc_offset_secs: i64::from(Local::now().offset().local_minus_utc()),
        }
    }

    /// Fixed offset in seconds east of UTC. Lets tests pin the conversion.
    pub const fn with_offset(utc_offset_secs: i64) -> Self {
        Self { utc_offset_secs }
    }

    /// Unix time to device time. Zero passes through, it marks an unset
    /// field.
    pub fn to_mac(&self, t: i64) -> u32 {
        if t == 0 {
            return 0;
        }
        (t + MAC_TIME_OFFSET + self.utc_offset_secs) as u32
    }

    /// Device time to Unix time. Zero passes through.
    pub fn to_unix(&self, t: u32) -> i64 {
        if t == 0 {
            return 0;
        }
        i64::from(t) - MAC_TIME_OFFSET - self.utc_offset_secs
    }
}

/// Fuzzy mtime comparison.
///
/// Two kinds of slight deviation still count as equal:
/// 1. exact multiples of one hour, give or take two seconds (time zone
///    disagreements between the filesystem that produced a cache and the one
///    being compared)
/// 2. less than 3 seconds (FAT timestamps are imprecise)
pub fn compare_mtime(a: i64, b: i64) -> bool {
    let diff = (a - b).abs();
    if diff > 86402 {
        return false;
    }
    matches!(diff % 3600, 0 | 1 | 2 | 3598 | 3599)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_time_round_trip() {
        let mac = MacTime::with_offset(3600);
        let t = 1_200_000_000;
        let device = mac.to_mac(t);
        assert_eq!(device, (t + 2_082_844_800 + 3600) as u32);
        assert_eq!(mac.to_unix(device), t);
    }

    #[test]
    fn test_zero_timestamp_passes_through() {
        let mac = MacTime::with_offset(-7200);
        assert_eq!(mac.to_mac(0), 0);
        assert_eq!(mac.to_unix(0), 0);
    }

    #[test]
    fn test_compare_mtime_exact_and_fuzzy() {
        assert!(compare_mtime(1000, 1000));
        assert!(compare_mtime(1000, 1002));
        assert!(compare_mtime(1002, 1000));
        assert!(!compare_mtime(1000, 1003));
        // whole-hour shifts, give or take two seconds
        assert!(compare_mtime(1000, 1000 + 3600));
        assert!(compare_mtime(1000, 1000 + 7200 - 1));
        assert!(compare_mtime(1000 + 7201, 1000));
        assert!(!compare_mtime(1000, 1000 + 3700));
        // more than a day apart never matches
        assert!(!compare_mtime(0, 86403));
        assert!(compare_mtime(0, 86400));
    }
}
