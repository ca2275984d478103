use super::*;

#[derive(Debug, Parser)]
pub(crate) struct Configure {
    #[command(flatten)]
    pub(crate) update: ConfigUpdate,
}

impl Configure {
    pub(crate) fn run(self, settings: Settings) -> Result {
        let store = ConfigStore::open(&settings.data_dir());

        if self.update.is_empty() {
            return print_json(&store.get());
        }

        let config = store.update(&self.update)?;

        info!("Saved mining configuration to {}", store.path().display());

        print_json(&config)
    }
}
