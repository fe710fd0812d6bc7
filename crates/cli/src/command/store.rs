use std::path::PathBuf;
use std::rc::Rc;

use clap::Args;
use tracing::debug;

use sprout_lib::platform::paths;
use sprout_lib::store::{LocalStore, Store, StoreError};

/// Access to the local store, opened on first use.
#[derive(Args, Default)]
pub struct StoreArgs {
  /// Root directory of the store
  #[arg(long = "store", value_name = "DIR", env = sprout_lib::consts::STORE_ENV)]
  pub store_root: Option<PathBuf>,

  #[arg(skip)]
  store: Option<Rc<dyn Store>>,
}

impl StoreArgs {
  pub fn root(&self) -> PathBuf {
    self.store_root.clone().unwrap_or_else(paths::store_root)
  }

  pub fn get_store(&mut self) -> Result<Rc<dyn Store>, StoreError> {
    if let Some(store) = &self.store {
      return Ok(store.clone());
    }
    let root = self.root();
    debug!(root = %root.display(), "opening store");
    let store: Rc<dyn Store> = Rc::new(LocalStore::open(&root)?);
    self.store = Some(store.clone());
    Ok(store)
  }
}
