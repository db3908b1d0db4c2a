//! Host port allocation for project containers.

use std::collections::HashSet;

use crate::errors::PanelError;

use super::runtime::ContainerRuntime;

/// First port in `[base, base + max)` that is not in `used`.
///
/// The range is clamped to `u16::MAX`. There is no reservation: two callers
/// scanning at the same time can be handed the same port.
pub fn first_free_port(used: &HashSet<u16>, base: u16, max: u16) -> Result<u16, PanelError> {
    let end = (u32::from(base) + u32::from(max)).min(u32::from(u16::MAX) + 1);
    (u32::from(base)..end)
        .filter_map(|p| u16::try_from(p).ok())
        .find(|p| !used.contains(p))
        .ok_or_else(|| PanelError::ResourceExhausted("No hay puertos disponibles".into()))
}

/// Scan the ports published by every container (running or stopped) and pick
/// the first free one in the configured range.
pub async fn next_available_port(
    runtime: &dyn ContainerRuntime,
    base: u16,
    max: u16,
) -> Result<u16, PanelError> {
    let used = runtime
        .published_ports()
        .await
        .map_err(PanelError::external)?;
    first_free_port(&used, base, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_range_start() {
        assert_eq!(first_free_port(&HashSet::new(), 4100, 20).unwrap(), 4100);
    }

    #[test]
    fn test_skips_used_ports() {
        let used: HashSet<u16> = [4100, 4101, 4103].into_iter().collect();
        assert_eq!(first_free_port(&used, 4100, 20).unwrap(), 4102);
    }

    #[test]
    fn test_ports_outside_range_are_ignored() {
        let used: HashSet<u16> = [80, 443, 4099, 4120].into_iter().collect();
        assert_eq!(first_free_port(&used, 4100, 20).unwrap(), 4100);
    }

    #[test]
    fn test_exhausted_range() {
        let used: HashSet<u16> = (4100..4103).collect();
        let err = first_free_port(&used, 4100, 3).unwrap_err();
        assert!(matches!(err, PanelError::ResourceExhausted(_)));
    }

    #[test]
    fn test_zero_max_is_exhausted() {
        assert!(first_free_port(&HashSet::new(), 4100, 0).is_err());
    }

    #[test]
    fn test_range_clamped_at_top_of_port_space() {
        let used: HashSet<u16> = [65534].into_iter().collect();
        assert_eq!(first_free_port(&used, 65534, 20).unwrap(), 65535);
        let used: HashSet<u16> = [65534, 65535].into_iter().collect();
        assert!(first_free_port(&used, 65534, 20).is_err());
    }

    #[test]
    fn test_result_always_in_range_and_free() {
        for taken in 0..10u16 {
            let used: HashSet<u16> = (5000..5000 + taken).collect();
            let port = first_free_port(&used, 5000, 10).unwrap();
            assert!((5000..5010).contains(&port));
            assert!(!used.contains(&port));
        }
    }
}
