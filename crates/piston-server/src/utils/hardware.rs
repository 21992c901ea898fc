use once_cell::sync::Lazy;
use std::sync::Mutex;
use sysinfo::System;

static SYSTEM: Lazy<Mutex<System>> = Lazy::new(|| {
    let mut sys = System::new();
    sys.refresh_memory();
    Mutex::new(sys)
});

/// Never recommend less than this, whatever the machine has.
pub const MIN_SERVER_RAM_MB: u64 = 1024;

/// Returns the total physical memory in Megabytes
pub fn get_total_memory_mb() -> u64 {
    let mut sys = SYSTEM.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    sys.refresh_memory();
    sys.total_memory() / 1024 / 1024
}

/// Heap size to give a server with `mod_count` mods, capped at 75% of system memory.
pub fn recommended_ram_mb(mod_count: usize) -> u64 {
    recommended_ram_for(mod_count, get_total_memory_mb())
}

pub fn recommended_ram_for(mod_count: usize, total_mb: u64) -> u64 {
    let wanted = match mod_count {
        0..=24 => 3072,
        25..=49 => 4096,
        50..=99 => 6144,
        100..=149 => 8192,
        _ => 10240,
    };
    if total_mb == 0 {
        return wanted;
    }
    let cap = (total_mb * 3 / 4).max(MIN_SERVER_RAM_MB);
    wanted.min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ram_scales_with_mod_count() {
        assert_eq!(recommended_ram_for(0, 64 * 1024), 3072);
        assert_eq!(recommended_ram_for(30, 64 * 1024), 4096);
        assert_eq!(recommended_ram_for(120, 64 * 1024), 8192);
        assert_eq!(recommended_ram_for(400, 64 * 1024), 10240);
    }

    #[test]
    fn ram_is_capped_by_system_memory() {
        assert_eq!(recommended_ram_for(400, 8192), 6144);
        assert_eq!(recommended_ram_for(10, 1024), MIN_SERVER_RAM_MB);
        assert_eq!(recommended_ram_for(10, 0), 3072);
    }
}
