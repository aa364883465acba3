use crate::entity::EntityResolver;
use std::sync::Arc;

pub struct AppState {
    pub resolver: Arc<EntityResolver>,
}
