use {super::*, sysinfo::System};

const GIB: f64 = (1u64 << 30) as f64;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSpecs {
    pub cpu_brand: String,
    pub cpu_count: usize,
    pub cpu_mhz: u64,
    pub total_memory_gb: f64,
}

impl SystemSpecs {
    pub fn detect() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        system.refresh_memory();

        let cpus = system.cpus();

        Self {
            cpu_brand: cpus
                .first()
                .map(|cpu| cpu.brand().to_string())
                .unwrap_or_else(|| "Unknown".into()),
            cpu_count: cpus.len().max(1),
            cpu_mhz: cpus.first().map(|cpu| cpu.frequency()).unwrap_or_default(),
            total_memory_gb: system.total_memory() as f64 / GIB,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "kebab-case")]
pub enum SystemTier {
    #[display("low-end")]
    LowEnd,
    #[display("entry-level")]
    EntryLevel,
    #[display("mid-range")]
    MidRange,
    #[display("high-end")]
    HighEnd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    pub optimal: usize,
    pub conservative: usize,
    pub max: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendations {
    pub tier: SystemTier,
    pub worker_threads: Suggestion,
    pub batch_size: Suggestion,
    pub warnings: Vec<String>,
}

pub fn recommendations(specs: &SystemSpecs) -> Recommendations {
    let cpus = specs.cpu_count.max(1);
    let memory = specs.total_memory_gb;

    let worker_threads = Suggestion {
        optimal: cpus,
        conservative: (cpus / 2).max(2).min(cpus),
        max: cpus,
    };

    let speed_multiplier = match specs.cpu_mhz {
        3500.. => 1.25,
        3000..3500 => 1.15,
        2500..3000 => 1.05,
        2000..2500 => 1.0,
        _ => 0.85,
    };

    let memory_multiplier = if memory >= 64.0 {
        1.2
    } else if memory >= 32.0 {
        1.15
    } else if memory >= 16.0 {
        1.05
    } else if memory >= 8.0 {
        1.0
    } else if memory >= 4.0 {
        0.8
    } else {
        0.6
    };

    let optimal = ((200 + cpus * 30) as f64 * speed_multiplier * memory_multiplier).round();

    // Scale from the unclamped optimum, then clamp each independently.
    let batch_size = Suggestion {
        optimal: (optimal as usize).clamp(150, 3000),
        conservative: ((optimal * 0.65).round() as usize).clamp(100, 2000),
        max: ((optimal * 1.8).round() as usize).clamp(250, 4000),
    };

    let tier = if cpus >= 12 && memory >= 16.0 {
        SystemTier::HighEnd
    } else if cpus >= 8 && memory >= 8.0 {
        SystemTier::MidRange
    } else if cpus >= 4 && memory >= 4.0 {
        SystemTier::EntryLevel
    } else {
        SystemTier::LowEnd
    };

    let mut warnings = Vec::new();

    if memory < 4.0 {
        warnings.push("Low memory, consider a smaller batch size".into());
    }

    if cpus < 4 {
        warnings.push("Few CPU cores, consider the conservative settings".into());
    }

    if specs.cpu_mhz < 2000 {
        warnings.push("Low CPU clock speed, expect lower hash rates".into());
    }

    if worker_threads.optimal > 12 {
        warnings.push("Many cores available, try the max worker threads".into());
    }

    Recommendations {
        tier,
        worker_threads,
        batch_size,
        warnings,
    }
}

/// Host CPU usage. Usage is computed between refreshes, so keep one sampler alive.
pub struct CpuSampler {
    system: System,
}

impl CpuSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self { system }
    }

    pub fn sample(&mut self) -> f64 {
        self.system.refresh_cpu_usage();
        self.system.global_cpu_usage().into()
    }
}
