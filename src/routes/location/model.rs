use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::ApiError;
use crate::schedule::ServiceType;

pub const DEFAULT_RADIUS_METERS: i32 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChurchLocation {
    pub id: Uuid,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// 围栏半径（米）
    pub radius: i32,
    pub address: Option<String>,
    pub description: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 地点及其当前生效的礼拜类型
#[derive(Debug, Serialize)]
pub struct LocationWithServices {
    #[serde(flatten)]
    pub location: ChurchLocation,
    pub active_services: Vec<ServiceType>,
}

/// 每种礼拜当前生效的地点
#[derive(Debug, Serialize)]
pub struct ActiveLocations {
    pub sabbath: Option<ChurchLocation>,
    pub wednesday: Option<ChurchLocation>,
    pub friday: Option<ChurchLocation>,
}

#[derive(Debug, Deserialize)]
pub struct CreateLocationRequest {
    pub name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius: Option<i32>,
    pub address: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateLocationRequest {
    pub id: Uuid,
    pub name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius: Option<i32>,
    pub address: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActivateLocationRequest {
    pub id: Uuid,
    pub services: Vec<ServiceType>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteLocationRequest {
    pub id: Uuid,
}

const LOCATION_COLUMNS: &str =
    "id, name, latitude, longitude, radius, address, description, created_by, created_at";

impl ChurchLocation {
    /// 返回某种礼拜当前生效的地点
    ///
    /// active_service_locations 以 service_type 为主键，
    /// 所以每种礼拜最多只有一个生效地点。
    pub async fn active_for(
        pool: &PgPool,
        service: ServiceType,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT l.id, l.name, l.latitude, l.longitude, l.radius,
                   l.address, l.description, l.created_by, l.created_at
            FROM active_service_locations a
            JOIN church_locations l ON l.id = a.location_id
            WHERE a.service_type = $1
            "#,
        )
        .bind(service.as_str())
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT {LOCATION_COLUMNS} FROM church_locations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    async fn active_services_of(pool: &PgPool, id: Uuid) -> Result<Vec<ServiceType>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT service_type FROM active_service_locations WHERE location_id = $1",
        )
        .bind(id)
        .fetch_all(pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(s,)| ServiceType::parse(&s))
            .collect())
    }

    /// 所有已保存的地点及其生效状态
    pub async fn list(pool: &PgPool) -> Result<Vec<LocationWithServices>, sqlx::Error> {
        let locations = sqlx::query_as::<_, Self>(&format!(
            "SELECT {LOCATION_COLUMNS} FROM church_locations ORDER BY created_at DESC"
        ))
        .fetch_all(pool)
        .await?;

        let assignments: Vec<(String, Uuid)> =
            sqlx::query_as("SELECT service_type, location_id FROM active_service_locations")
                .fetch_all(pool)
                .await?;

        Ok(locations
            .into_iter()
            .map(|location| {
                let active_services = assignments
                    .iter()
                    .filter(|(_, location_id)| *location_id == location.id)
                    .filter_map(|(service, _)| ServiceType::parse(service))
                    .collect();
                LocationWithServices {
                    location,
                    active_services,
                }
            })
            .collect())
    }

    pub async fn active_map(pool: &PgPool) -> Result<ActiveLocations, sqlx::Error> {
        Ok(ActiveLocations {
            sabbath: Self::active_for(pool, ServiceType::SabbathMorning).await?,
            wednesday: Self::active_for(pool, ServiceType::WednesdayVespers).await?,
            friday: Self::active_for(pool, ServiceType::FridayVespers).await?,
        })
    }

    pub async fn create(
        pool: &PgPool,
        req: CreateLocationRequest,
        created_by: &str,
    ) -> Result<Self, ApiError> {
        let (Some(name), Some(latitude), Some(longitude)) = (req.name, req.latitude, req.longitude)
        else {
            return Err(ApiError::InvalidInput(
                "名称、纬度和经度都是必填项".to_string(),
            ));
        };
        let radius = req.radius.unwrap_or(DEFAULT_RADIUS_METERS);
        if radius <= 0 {
            return Err(ApiError::InvalidInput("围栏半径必须是正数".to_string()));
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM church_locations WHERE name = $1)")
                .bind(&name)
                .fetch_one(pool)
                .await?;
        if exists {
            return Err(ApiError::DuplicateName);
        }

        let location = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO church_locations
                (id, name, latitude, longitude, radius, address, description, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {LOCATION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&name)
        .bind(latitude)
        .bind(longitude)
        .bind(radius)
        .bind(&req.address)
        .bind(&req.description)
        .bind(created_by)
        .fetch_one(pool)
        .await
        .map_err(|e| match &e {
            // 唯一索引兜底，防止并发创建穿过上面的预检查
            sqlx::Error::Database(db) if db.is_unique_violation() => ApiError::DuplicateName,
            _ => ApiError::Database(e),
        })?;

        tracing::info!("Created church location {}", location.name);
        Ok(location)
    }

    pub async fn update(pool: &PgPool, req: UpdateLocationRequest) -> Result<Self, ApiError> {
        if let Some(radius) = req.radius {
            if radius <= 0 {
                return Err(ApiError::InvalidInput("围栏半径必须是正数".to_string()));
            }
        }

        let location = sqlx::query_as::<_, Self>(&format!(
            r#"
            UPDATE church_locations
            SET name = COALESCE($2, name),
                latitude = COALESCE($3, latitude),
                longitude = COALESCE($4, longitude),
                radius = COALESCE($5, radius),
                address = COALESCE($6, address),
                description = COALESCE($7, description)
            WHERE id = $1
            RETURNING {LOCATION_COLUMNS}
            "#
        ))
        .bind(req.id)
        .bind(&req.name)
        .bind(req.latitude)
        .bind(req.longitude)
        .bind(req.radius)
        .bind(&req.address)
        .bind(&req.description)
        .fetch_optional(pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => ApiError::DuplicateName,
            _ => ApiError::Database(e),
        })?;

        location.ok_or(ApiError::LocationNotFound)
    }

    /// 把地点设为指定礼拜的生效地点
    ///
    /// 在一个事务内逐一覆盖映射行，提交后对并发读者原子可见，
    /// 任何时刻都不会出现同一礼拜有两个生效地点。
    pub async fn activate(
        pool: &PgPool,
        req: ActivateLocationRequest,
    ) -> Result<LocationWithServices, ApiError> {
        if req.services.is_empty() {
            return Err(ApiError::InvalidInput(
                "请指定要激活的礼拜类型".to_string(),
            ));
        }

        let location = Self::find_by_id(pool, req.id)
            .await?
            .ok_or(ApiError::LocationNotFound)?;

        let mut services: Vec<ServiceType> = Vec::new();
        for service in req.services {
            if !services.contains(&service) {
                services.push(service);
            }
        }

        let mut tx = pool.begin().await?;
        for service in &services {
            sqlx::query(
                r#"
                INSERT INTO active_service_locations (service_type, location_id, updated_at)
                VALUES ($1, $2, NOW())
                ON CONFLICT (service_type)
                DO UPDATE SET location_id = EXCLUDED.location_id, updated_at = NOW()
                "#,
            )
            .bind(service.as_str())
            .bind(location.id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::info!(
            "Location {} is now active for {} service(s)",
            location.name,
            services.len()
        );

        let active_services = Self::active_services_of(pool, location.id).await?;
        Ok(LocationWithServices {
            location,
            active_services,
        })
    }

    /// 删除地点；仍被任何礼拜使用时拒绝
    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<(), ApiError> {
        let location = Self::find_by_id(pool, id)
            .await?
            .ok_or(ApiError::LocationNotFound)?;

        let in_use: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM active_service_locations WHERE location_id = $1)",
        )
        .bind(id)
        .fetch_one(pool)
        .await?;
        if in_use {
            return Err(ApiError::LocationInUse);
        }

        sqlx::query("DELETE FROM church_locations WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await
            .map_err(|e| match &e {
                // 外键RESTRICT兜底：预检查和删除之间地点又被激活
                sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                    ApiError::LocationInUse
                }
                _ => ApiError::Database(e),
            })?;

        tracing::info!("Deleted church location {}", location.name);
        Ok(())
    }
}
