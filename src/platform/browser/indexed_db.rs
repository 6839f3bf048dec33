//! Lightweight IndexedDB helpers shared across the persistence layer.
//!
//! Generalizes a single-object-store key/value helper into the shape the
//! Persistence Store needs: several named object stores, one of which
//! (`chunks`) carries a secondary index so chunks can be looked up and bulk
//! deleted by `uploadId` without a full scan.

/// Declares one object store to create on database upgrade.
#[derive(Clone, Copy, Debug)]
pub struct StoreSpec {
    pub name: &'static str,
    /// Name of a secondary index to create on this store, if any.
    pub index: Option<IndexSpec>,
}

#[derive(Clone, Copy, Debug)]
pub struct IndexSpec {
    pub name: &'static str,
    pub key_path: &'static str,
}

#[cfg(all(
    feature = "wasm-web",
    target_arch = "wasm32",
    feature = "experimental-indexed-db"
))]
mod wasm {
    use super::StoreSpec;
    use wasm_bindgen::closure::Closure;
    use wasm_bindgen::JsCast;
    use wasm_bindgen::JsValue;
    use wasm_bindgen_futures::JsFuture;
    use web_sys::{
        DomStringList, Event, IdbCursorWithValue, IdbDatabase, IdbIndexParameters,
        IdbObjectStoreParameters, IdbOpenDbRequest, IdbRequest, IdbTransactionMode,
        IdbVersionChangeEvent,
    };

    #[derive(Debug)]
    pub enum IndexedDbError {
        Unsupported(&'static str),
        Operation(String),
    }

    impl std::fmt::Display for IndexedDbError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                IndexedDbError::Unsupported(msg) => write!(f, "IndexedDB unsupported: {msg}"),
                IndexedDbError::Operation(msg) => write!(f, "IndexedDB error: {msg}"),
            }
        }
    }

    impl std::error::Error for IndexedDbError {}

    pub type IndexedDbResult<T> = Result<T, IndexedDbError>;

    const UNSUPPORTED: &str = "IndexedDB APIs are not available in this environment";

    /// Opens (or creates/upgrades) a database, ensuring every store in `stores`
    /// exists along with any secondary index it declares.
    pub async fn open_database(
        name: &str,
        version: u32,
        stores: &'static [StoreSpec],
    ) -> IndexedDbResult<IdbDatabase> {
        let window = web_sys::window().ok_or(IndexedDbError::Unsupported(UNSUPPORTED))?;
        let factory = window
            .indexed_db()
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?
            .ok_or(IndexedDbError::Unsupported(UNSUPPORTED))?;
        let request = factory
            .open_with_u32(name, version)
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;

        let upgrade_handler = Closure::wrap(Box::new(move |event: IdbVersionChangeEvent| {
            if let Some(target) = event.target() {
                if let Ok(open_request) = target.dyn_into::<IdbOpenDbRequest>() {
                    if let Ok(result) = open_request.result() {
                        if let Ok(db) = result.dyn_into::<IdbDatabase>() {
                            for spec in stores {
                                ensure_store_exists(&db, spec);
                            }
                        }
                    }
                }
            }
        }) as Box<dyn FnMut(_)>);
        request.set_onupgradeneeded(Some(upgrade_handler.as_ref().unchecked_ref()));
        upgrade_handler.forget();

        let db_js = JsFuture::from(request_to_future(clone_as_idb_request(&request)))
            .await
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        let db: IdbDatabase = db_js
            .dyn_into()
            .map_err(|_| IndexedDbError::Operation("Failed to acquire database handle".into()))?;
        Ok(db)
    }

    /// Reads a UTF-8 string value from the specified store and key.
    pub async fn get_string(
        db: &IdbDatabase,
        store: &str,
        key: &str,
    ) -> IndexedDbResult<Option<String>> {
        let tx = db
            .transaction_with_str_and_mode(store, IdbTransactionMode::Readonly)
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        let object_store = tx
            .object_store(store)
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        let request = object_store
            .get(&JsValue::from_str(key))
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        let result = JsFuture::from(request_to_future(request))
            .await
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        value_as_optional_string(result)
    }

    /// Writes a UTF-8 string value into the specified store/key.
    pub async fn put_string(
        db: &IdbDatabase,
        store: &str,
        key: &str,
        value: &str,
    ) -> IndexedDbResult<()> {
        let tx = db
            .transaction_with_str_and_mode(store, IdbTransactionMode::Readwrite)
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        let object_store = tx
            .object_store(store)
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        let request = object_store
            .put_with_key(&JsValue::from_str(value), &JsValue::from_str(key))
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        JsFuture::from(request_to_future(request))
            .await
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        Ok(())
    }

    /// Deletes the value stored under the given key. Idempotent.
    pub async fn delete_key(db: &IdbDatabase, store: &str, key: &str) -> IndexedDbResult<()> {
        let tx = db
            .transaction_with_str_and_mode(store, IdbTransactionMode::Readwrite)
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        let object_store = tx
            .object_store(store)
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        let request = object_store
            .delete(&JsValue::from_str(key))
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        JsFuture::from(request_to_future(request))
            .await
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        Ok(())
    }

    /// Full scan of every string value in a store. Ordering is unspecified.
    pub async fn get_all_strings(db: &IdbDatabase, store: &str) -> IndexedDbResult<Vec<String>> {
        let tx = db
            .transaction_with_str_and_mode(store, IdbTransactionMode::Readonly)
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        let object_store = tx
            .object_store(store)
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        let request = object_store
            .get_all()
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        let result = JsFuture::from(request_to_future(request))
            .await
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        values_array_to_strings(result)
    }

    /// Returns every string value in `store` whose secondary index `index`
    /// equals `index_key`.
    pub async fn get_all_by_index(
        db: &IdbDatabase,
        store: &str,
        index: &str,
        index_key: &str,
    ) -> IndexedDbResult<Vec<String>> {
        let tx = db
            .transaction_with_str_and_mode(store, IdbTransactionMode::Readonly)
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        let object_store = tx
            .object_store(store)
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        let idx = object_store
            .index(index)
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        let request = idx
            .get_all_with_key(&JsValue::from_str(index_key))
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        let result = JsFuture::from(request_to_future(request))
            .await
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        values_array_to_strings(result)
    }

    /// Deletes every record in `store` whose secondary index `index` equals
    /// `index_key`, via a cursor walk (the collection-delete `deleteChunks`
    /// needs per spec §4.1).
    pub async fn delete_all_by_index(
        db: &IdbDatabase,
        store: &str,
        index: &str,
        index_key: &str,
    ) -> IndexedDbResult<()> {
        let tx = db
            .transaction_with_str_and_mode(store, IdbTransactionMode::Readwrite)
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        let object_store = tx
            .object_store(store)
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        let idx = object_store
            .index(index)
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        let request = idx
            .open_cursor_with_range(&JsValue::from_str(index_key))
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;

        loop {
            let cursor_value = JsFuture::from(request_to_future(request.clone().unchecked_into()))
                .await
                .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
            if cursor_value.is_null() || cursor_value.is_undefined() {
                break;
            }
            let cursor: IdbCursorWithValue = cursor_value
                .dyn_into()
                .map_err(|_| IndexedDbError::Operation("cursor result malformed".into()))?;
            cursor
                .delete()
                .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
            cursor
                .continue_()
                .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        }
        Ok(())
    }

    /// Deletes the entire database. Useful for tests.
    pub async fn delete_database(name: &str) -> IndexedDbResult<()> {
        let window = web_sys::window().ok_or(IndexedDbError::Unsupported(UNSUPPORTED))?;
        let factory = window
            .indexed_db()
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?
            .ok_or(IndexedDbError::Unsupported(UNSUPPORTED))?;
        let request = factory
            .delete_database(name)
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        JsFuture::from(request_to_future(clone_as_idb_request(&request)))
            .await
            .map_err(|err| IndexedDbError::Operation(js_value_to_string(&err)))?;
        Ok(())
    }

    fn ensure_store_exists(db: &IdbDatabase, spec: &StoreSpec) {
        let existing = db.object_store_names();
        let object_store = if dom_string_list_contains(&existing, spec.name) {
            return;
        } else {
            let mut params = IdbObjectStoreParameters::new();
            params.key_path(Some(&JsValue::from_str("id")));
            match db.create_object_store_with_optional_parameters(spec.name, &params) {
                Ok(store) => store,
                Err(_) => return,
            }
        };

        if let Some(index) = spec.index {
            let params = IdbIndexParameters::new();
            let _ = object_store.create_index_with_str_and_optional_parameters(
                index.name,
                index.key_path,
                &params,
            );
        }
    }

    fn dom_string_list_contains(list: &DomStringList, target: &str) -> bool {
        for idx in 0..list.length() {
            if let Some(value) = list.item(idx) {
                if value == target {
                    return true;
                }
            }
        }
        false
    }

    fn value_as_optional_string(result: JsValue) -> IndexedDbResult<Option<String>> {
        if result.is_undefined() || result.is_null() {
            Ok(None)
        } else if let Some(value) = result.as_string() {
            Ok(Some(value))
        } else {
            Err(IndexedDbError::Operation(
                "Stored value is not a string".into(),
            ))
        }
    }

    fn values_array_to_strings(result: JsValue) -> IndexedDbResult<Vec<String>> {
        let array: js_sys::Array = result
            .dyn_into()
            .map_err(|_| IndexedDbError::Operation("getAll did not return an array".into()))?;
        let mut values = Vec::with_capacity(array.length() as usize);
        for item in array.iter() {
            match item.as_string() {
                Some(text) => values.push(text),
                None => {
                    return Err(IndexedDbError::Operation(
                        "Stored value is not a string".into(),
                    ))
                }
            }
        }
        Ok(values)
    }

    fn request_to_future(request: IdbRequest) -> js_sys::Promise {
        let success_request = request.clone();
        let error_request = request.clone();
        js_sys::Promise::new(&mut move |resolve, reject| {
            let resolve_fn = resolve.clone();
            let reject_for_success = reject.clone();
            let success_request_clone = success_request.clone();
            let success = Closure::once(
                Box::new(move |_event: Event| match success_request_clone.result() {
                    Ok(result) => {
                        let _ = resolve_fn.call1(&JsValue::UNDEFINED, &result);
                    }
                    Err(err) => {
                        let _ = reject_for_success.call1(&JsValue::UNDEFINED, &err);
                    }
                }) as Box<dyn FnMut(_)>,
            );
            request.set_onsuccess(Some(success.as_ref().unchecked_ref()));
            success.forget();

            let reject_fn = reject.clone();
            let error_request_clone = error_request.clone();
            let error = Closure::once(Box::new(move |_event: Event| {
                match error_request_clone.error() {
                    Ok(Some(err)) => {
                        let _ = reject_fn.call1(&JsValue::UNDEFINED, &err);
                    }
                    Ok(None) => {
                        let _ = reject_fn.call1(&JsValue::UNDEFINED, &JsValue::NULL);
                    }
                    Err(js_err) => {
                        let _ = reject_fn.call1(&JsValue::UNDEFINED, &js_err);
                    }
                }
            }) as Box<dyn FnMut(_)>);
            request.set_onerror(Some(error.as_ref().unchecked_ref()));
            error.forget();
        })
    }

    fn clone_as_idb_request(request: &IdbOpenDbRequest) -> IdbRequest {
        request.clone().unchecked_into::<IdbRequest>()
    }

    fn js_value_to_string(value: &JsValue) -> String {
        if let Some(exception) = value.dyn_ref::<web_sys::DomException>() {
            format!("{}: {}", exception.name(), exception.message())
        } else if let Some(text) = value.as_string() {
            text
        } else {
            format!("{:?}", value)
        }
    }

    pub use IndexedDbError as Error;
}

#[cfg(all(
    feature = "wasm-web",
    target_arch = "wasm32",
    feature = "experimental-indexed-db"
))]
pub use wasm::*;

#[cfg(not(all(
    feature = "wasm-web",
    target_arch = "wasm32",
    feature = "experimental-indexed-db"
)))]
mod stub {
    use super::StoreSpec;

    #[derive(Debug)]
    pub enum IndexedDbError {
        Unsupported,
    }

    impl std::fmt::Display for IndexedDbError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "IndexedDB not supported on this target")
        }
    }

    impl std::error::Error for IndexedDbError {}

    pub type IndexedDbResult<T> = std::result::Result<T, IndexedDbError>;

    pub type IdbDatabase = ();

    pub async fn open_database(
        _name: &str,
        _version: u32,
        _stores: &'static [StoreSpec],
    ) -> IndexedDbResult<IdbDatabase> {
        Err(IndexedDbError::Unsupported)
    }

    pub async fn get_string(
        _db: &IdbDatabase,
        _store: &str,
        _key: &str,
    ) -> IndexedDbResult<Option<String>> {
        Err(IndexedDbError::Unsupported)
    }

    pub async fn put_string(
        _db: &IdbDatabase,
        _store: &str,
        _key: &str,
        _value: &str,
    ) -> IndexedDbResult<()> {
        Err(IndexedDbError::Unsupported)
    }

    pub async fn delete_key(_db: &IdbDatabase, _store: &str, _key: &str) -> IndexedDbResult<()> {
        Err(IndexedDbError::Unsupported)
    }

    pub async fn get_all_strings(_db: &IdbDatabase, _store: &str) -> IndexedDbResult<Vec<String>> {
        Err(IndexedDbError::Unsupported)
    }

    pub async fn get_all_by_index(
        _db: &IdbDatabase,
        _store: &str,
        _index: &str,
        _index_key: &str,
    ) -> IndexedDbResult<Vec<String>> {
        Err(IndexedDbError::Unsupported)
    }

    pub async fn delete_all_by_index(
        _db: &IdbDatabase,
        _store: &str,
        _index: &str,
        _index_key: &str,
    ) -> IndexedDbResult<()> {
        Err(IndexedDbError::Unsupported)
    }

    pub async fn delete_database(_name: &str) -> IndexedDbResult<()> {
        Err(IndexedDbError::Unsupported)
    }

    pub use IndexedDbError as Error;
}

#[cfg(not(all(
    feature = "wasm-web",
    target_arch = "wasm32",
    feature = "experimental-indexed-db"
)))]
pub use stub::*;
