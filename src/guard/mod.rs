use std::collections::HashMap;
use std::fmt::Write;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use redis::{AsyncCommands, Client as RedisClient};
use sha2::{Digest, Sha256};

use crate::schedule::ServiceType;

// 设备指纹缓存常量
const DEVICE_KEY_PREFIX: &str = "attendance:device:"; // 设备指纹缓存前缀
const DEVICE_ENTRY_TTL_SECS: u64 = 86_400; // 条目保留一个礼拜日（秒）

/// 设备检查结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCheck {
    Allowed,
    Rejected { existing_email: String },
}

/// 防止同一设备在同一天同一礼拜内为多个不同成员签到。
///
/// 这只是一个尽力而为的限流启发式，不是正确性保证：
/// 条目在一个礼拜日后过期，内存后端在进程重启后清空。
/// 签到记录本身的唯一性由数据库唯一约束保证。
pub struct DeviceFraudGuard {
    backend: Backend,
}

enum Backend {
    Redis(Arc<RedisClient>),
    Memory(Mutex<HashMap<String, String>>),
}

impl DeviceFraudGuard {
    /// 生产环境：Redis后端，跨进程共享，条目带TTL
    pub fn redis(client: Arc<RedisClient>) -> Self {
        Self {
            backend: Backend::Redis(client),
        }
    }

    /// 测试环境：进程内存后端
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Mutex::new(HashMap::new())),
        }
    }

    // 设备ID可能是很长的浏览器指纹，摘要后作为定长缓存key
    fn device_key(device_id: &str, day: NaiveDate, service: ServiceType) -> String {
        let digest = Sha256::digest(device_id.as_bytes());
        let fingerprint = digest.iter().take(16).fold(String::new(), |mut acc, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        });

        format!("{DEVICE_KEY_PREFIX}{fingerprint}:{day}:{service}")
    }

    /// 检查并登记设备使用：不存在则原子写入并放行；
    /// 已存在且邮箱一致则放行；已存在且邮箱不同则拒绝。
    pub async fn check_and_record(
        &self,
        device_id: &str,
        day: NaiveDate,
        service: ServiceType,
        email: &str,
    ) -> Result<DeviceCheck, redis::RedisError> {
        let key = Self::device_key(device_id, day, service);

        match &self.backend {
            Backend::Redis(client) => {
                let mut conn = client.get_multiplexed_async_connection().await?;

                // SET NX 原子地“不存在才写入”，避免读后写竞争
                let inserted: Option<String> = redis::cmd("SET")
                    .arg(&key)
                    .arg(email)
                    .arg("NX")
                    .arg("EX")
                    .arg(DEVICE_ENTRY_TTL_SECS)
                    .query_async(&mut conn)
                    .await?;

                if inserted.is_some() {
                    return Ok(DeviceCheck::Allowed);
                }

                let existing: Option<String> = conn.get(&key).await?;
                match existing {
                    Some(existing_email) if existing_email != email => {
                        Ok(DeviceCheck::Rejected { existing_email })
                    }
                    // 同一邮箱重复提交，或条目恰好过期，都放行
                    _ => Ok(DeviceCheck::Allowed),
                }
            }
            Backend::Memory(entries) => {
                let mut entries = entries.lock().unwrap_or_else(|e| e.into_inner());

                match entries.get(&key) {
                    Some(existing) if existing != email => Ok(DeviceCheck::Rejected {
                        existing_email: existing.clone(),
                    }),
                    Some(_) => Ok(DeviceCheck::Allowed),
                    None => {
                        entries.insert(key, email.to_string());
                        Ok(DeviceCheck::Allowed)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 8).unwrap()
    }

    #[tokio::test]
    async fn first_use_is_allowed_and_recorded() {
        let guard = DeviceFraudGuard::in_memory();

        let check = guard
            .check_and_record("dev-1", day(), ServiceType::SabbathMorning, "alice@x.com")
            .await
            .unwrap();
        assert_eq!(check, DeviceCheck::Allowed);
    }

    #[tokio::test]
    async fn second_identity_on_same_device_is_rejected() {
        let guard = DeviceFraudGuard::in_memory();

        guard
            .check_and_record("dev-1", day(), ServiceType::SabbathMorning, "alice@x.com")
            .await
            .unwrap();
        let check = guard
            .check_and_record("dev-1", day(), ServiceType::SabbathMorning, "bob@x.com")
            .await
            .unwrap();

        assert_eq!(
            check,
            DeviceCheck::Rejected {
                existing_email: "alice@x.com".to_string()
            }
        );
    }

    #[tokio::test]
    async fn same_identity_may_retry_on_same_device() {
        let guard = DeviceFraudGuard::in_memory();

        guard
            .check_and_record("dev-1", day(), ServiceType::SabbathMorning, "alice@x.com")
            .await
            .unwrap();
        let check = guard
            .check_and_record("dev-1", day(), ServiceType::SabbathMorning, "alice@x.com")
            .await
            .unwrap();

        assert_eq!(check, DeviceCheck::Allowed);
    }

    #[tokio::test]
    async fn entries_are_scoped_by_device_day_and_service() {
        let guard = DeviceFraudGuard::in_memory();

        guard
            .check_and_record("dev-1", day(), ServiceType::SabbathMorning, "alice@x.com")
            .await
            .unwrap();

        // 不同设备
        let check = guard
            .check_and_record("dev-2", day(), ServiceType::SabbathMorning, "bob@x.com")
            .await
            .unwrap();
        assert_eq!(check, DeviceCheck::Allowed);

        // 不同日期
        let next_week = NaiveDate::from_ymd_opt(2025, 3, 15).unwrap();
        let check = guard
            .check_and_record("dev-1", next_week, ServiceType::SabbathMorning, "bob@x.com")
            .await
            .unwrap();
        assert_eq!(check, DeviceCheck::Allowed);

        // 同一天的另一场礼拜
        let check = guard
            .check_and_record("dev-1", day(), ServiceType::FridayVespers, "bob@x.com")
            .await
            .unwrap();
        assert_eq!(check, DeviceCheck::Allowed);
    }
}
