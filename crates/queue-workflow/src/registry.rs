//! 科室串行化注册表
//!
//! 每个科室一把异步互斥锁，首次访问时创建，进程内常驻。
//! 同一科室的“写入 + 重新排序 + 发布”在锁内串行执行，不同科室互不影响。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

/// 科室运行状态，只能在持有科室锁时访问
#[derive(Debug, Default)]
pub struct DepartmentState {
    /// 是否已挂接存储订阅
    pub watching: bool,
}

pub type DepartmentSlot = Arc<AsyncMutex<DepartmentState>>;

/// 科室锁注册表
#[derive(Debug, Default)]
pub struct DepartmentRegistry {
    slots: Mutex<HashMap<String, DepartmentSlot>>,
}

impl DepartmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取科室锁，不存在时创建
    pub fn slot(&self, department: &str) -> DepartmentSlot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(department.to_string())
            .or_insert_with(|| {
                tracing::debug!("Created serialization slot for department {}", department);
                Arc::new(AsyncMutex::new(DepartmentState::default()))
            })
            .clone()
    }

    /// 已知科室列表
    pub fn departments(&self) -> Vec<String> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = slots.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_department_shares_slot() {
        let registry = DepartmentRegistry::new();
        let a = registry.slot("ent");
        let b = registry.slot("ent");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.departments(), vec!["ent".to_string()]);
    }

    #[tokio::test]
    async fn test_departments_do_not_block_each_other() {
        let registry = DepartmentRegistry::new();
        let ent = registry.slot("ent");
        let _held = ent.lock().await;

        let eye = registry.slot("eye");
        let acquired = tokio::time::timeout(Duration::from_millis(100), eye.lock()).await;
        assert!(acquired.is_ok());

        let blocked = tokio::time::timeout(Duration::from_millis(20), ent.lock()).await;
        assert!(blocked.is_err());
    }
}
