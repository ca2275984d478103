use {super::*, std::ops::Range};

/// A set of workers that mine one address together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Group {
    pub(crate) id: usize,
    pub(crate) workers: Range<usize>,
}

impl Group {
    pub(crate) fn size(&self) -> usize {
        self.workers.len()
    }
}

/// Split `worker_threads` into groups. The remainder joins the last group.
pub(crate) fn plan(config: &MiningConfig) -> Vec<Group> {
    let threads = config.worker_threads.max(1);

    let sizes = match config.worker_grouping_mode {
        GroupingMode::AllOnOne => vec![threads],
        GroupingMode::Auto | GroupingMode::Grouped => {
            let per_address = config.effective_workers_per_address().max(1);

            if threads <= per_address {
                vec![threads]
            } else {
                let mut sizes = vec![per_address; threads / per_address];
                if let Some(last) = sizes.last_mut() {
                    *last += threads % per_address;
                }
                sizes
            }
        }
    };

    let mut start = 0;
    sizes
        .into_iter()
        .enumerate()
        .map(|(id, size)| {
            let group = Group {
                id,
                workers: start..start + size,
            };
            start += size;
            group
        })
        .collect()
}
