// src/utils/system.rs: System functions

use sysinfo::System;


/// Determines number of cores that can be used by the aligner
///
/// # Arguments
///
/// * `requested` - Thread count from the command line, if any.
///
/// # Returns
///
/// usize thread count, never zero
pub fn detect_threads(requested: Option<usize>) -> usize {
    match requested {
        Some(n) if n > 0 => n,
        _ => System::physical_core_count().unwrap_or(1).max(1),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_threads() {
        assert_eq!(detect_threads(Some(3)), 3);
        assert!(detect_threads(None) >= 1);
        assert!(detect_threads(Some(0)) >= 1);
    }
}
