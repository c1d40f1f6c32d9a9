//! Roles, permission codes and menu tree of the signed-in user.

use crate::pipeline::ApiClient;
use crate::types::{Menu, UserPermissions};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

const SUCCESS_CODE: i64 = 200;

#[derive(Debug, Default)]
struct PermissionData {
    roles: Vec<String>,
    codes: HashSet<String>,
    menus: Vec<Menu>,
    loaded: bool,
}

/// Authorization context fetched after login or rehydration.
///
/// Any load failure degrades to an empty, not-loaded context; it never
/// affects authentication.
#[derive(Debug, Clone, Default)]
pub struct PermissionContext {
    data: Arc<RwLock<PermissionData>>,
}

impl PermissionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch permissions and menus concurrently. Returns whether the
    /// permission set loaded.
    pub async fn load(&self, client: &ApiClient) -> bool {
        let (permissions, menus) = tokio::join!(
            client.get::<UserPermissions>("/users/permissions"),
            client.get::<Vec<Menu>>("/menus/user"),
        );

        let permissions = match permissions {
            Ok(env) if env.code == SUCCESS_CODE => env.data,
            Ok(env) => {
                warn!(code = env.code, message = %env.message, "Permission load rejected");
                None
            }
            Err(e) => {
                warn!(error = %e, "Permission load failed");
                None
            }
        };

        let menus = match menus {
            Ok(env) if env.code == SUCCESS_CODE => env.data.unwrap_or_default(),
            Ok(env) => {
                warn!(code = env.code, message = %env.message, "Menu load rejected");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "Menu load failed");
                Vec::new()
            }
        };

        let mut data = self.data.write();
        data.menus = menus;
        match permissions {
            Some(p) => {
                debug!(
                    roles = p.roles.len(),
                    permissions = p.permissions.len(),
                    "Permission context loaded"
                );
                data.roles = p.roles;
                data.codes = p.permissions.into_iter().collect();
                data.loaded = true;
            }
            None => {
                data.roles.clear();
                data.codes.clear();
                data.loaded = false;
            }
        }
        data.loaded
    }

    pub fn is_loaded(&self) -> bool {
        self.data.read().loaded
    }

    pub fn has_permission(&self, code: &str) -> bool {
        self.data.read().codes.contains(code)
    }

    pub fn has_any_permission<S: AsRef<str>>(&self, codes: &[S]) -> bool {
        let data = self.data.read();
        codes.iter().any(|c| data.codes.contains(c.as_ref()))
    }

    /// True for an empty list.
    pub fn has_all_permissions<S: AsRef<str>>(&self, codes: &[S]) -> bool {
        let data = self.data.read();
        codes.iter().all(|c| data.codes.contains(c.as_ref()))
    }

    pub fn roles(&self) -> Vec<String> {
        self.data.read().roles.clone()
    }

    /// Permission codes, sorted.
    pub fn permissions(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.data.read().codes.iter().cloned().collect();
        codes.sort();
        codes
    }

    pub fn menus(&self) -> Vec<Menu> {
        self.data.read().menus.clone()
    }

    /// Visible menus the user may open, children filtered the same way.
    pub fn accessible_menus(&self) -> Vec<Menu> {
        let data = self.data.read();
        filter_menus(&data.menus, &data.codes)
    }

    pub fn clear(&self) {
        *self.data.write() = PermissionData::default();
    }

    #[cfg(test)]
    pub(crate) fn set_for_test(&self, codes: &[&str], menus: Vec<Menu>) {
        let mut data = self.data.write();
        data.codes = codes.iter().map(|c| c.to_string()).collect();
        data.menus = menus;
        data.loaded = true;
    }
}

fn filter_menus(menus: &[Menu], codes: &HashSet<String>) -> Vec<Menu> {
    let mut out: Vec<Menu> = menus
        .iter()
        .filter(|m| m.visible && (m.permission_code.is_empty() || codes.contains(&m.permission_code)))
        .map(|m| Menu {
            children: filter_menus(&m.children, codes),
            ..m.clone()
        })
        .collect();
    out.sort_by_key(|m| m.order_num);
    out
}
