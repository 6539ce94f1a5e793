use futures::future::LocalFutureObj;
use futures::task::{LocalSpawn, SpawnError};

/// Runs background refetches on the browser's microtask queue.
pub struct WasmSpawner;

impl LocalSpawn for WasmSpawner {
    fn spawn_local_obj(&self, future: LocalFutureObj<'static, ()>) -> Result<(), SpawnError> {
        wasm_bindgen_futures::spawn_local(future);
        Ok(())
    }
}
