use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::err::Error;
use crate::models::{
    Appointment, AppointmentRow, AppointmentStatus, AppointmentUpdate, Profile, ProfileRow,
    ProfileUpdate,
};
use crate::permissions::Role;

#[derive(Debug, Clone, PartialEq)]
pub struct NewAppointment {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_date: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Which appointments a caller gets to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppointmentScope {
    Patient(Uuid),
    Doctor(Uuid),
    All,
}

impl AppointmentScope {
    pub fn for_role(role: Role, user: Uuid) -> Self {
        match role {
            Role::Patient => AppointmentScope::Patient(user),
            Role::Doctor => AppointmentScope::Doctor(user),
            Role::Admin => AppointmentScope::All,
        }
    }
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Exactly one row by identity; a missing row is [`Error::NotFound`].
    async fn fetch_profile(&self, id: Uuid) -> Result<Profile, Error>;

    async fn upsert_profile(&self, profile: &Profile) -> Result<Profile, Error>;

    async fn update_profile(
        &self,
        id: Uuid,
        update: ProfileUpdate,
        at: DateTime<Utc>,
    ) -> Result<Profile, Error>;

    async fn record_sign_in(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), Error>;

    async fn list_doctors(&self, name_filter: Option<&str>) -> Result<Vec<Profile>, Error>;
}

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn insert_appointment(&self, new: NewAppointment) -> Result<Appointment, Error>;

    async fn fetch_appointment(&self, id: Uuid) -> Result<Appointment, Error>;

    async fn list_appointments(&self, scope: AppointmentScope) -> Result<Vec<Appointment>, Error>;

    async fn update_appointment(
        &self,
        id: Uuid,
        update: AppointmentUpdate,
        at: DateTime<Utc>,
    ) -> Result<Appointment, Error>;
}

/// Both tables on the hosted Postgres database.
#[derive(Clone)]
pub struct PgStore {
    pg: PgPool,
}

impl PgStore {
    pub fn new(pg: PgPool) -> Self {
        Self { pg }
    }

    pub async fn connect(url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pg = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pg))
    }
}

fn appointment(row: AppointmentRow) -> Result<Appointment, Error> {
    Appointment::try_from(row).map_err(|message| Error::InternalError {
        kind: "DatabaseError",
        message,
    })
}

#[async_trait]
impl ProfileStore for PgStore {
    async fn fetch_profile(&self, id: Uuid) -> Result<Profile, Error> {
        let row = sqlx::query_as::<_, ProfileRow>("SELECT * FROM profiles WHERE id = $1 LIMIT 1")
            .bind(id)
            .fetch_optional(&self.pg)
            .await?;
        match row {
            Some(row) => Ok(row.into()),
            None => Err(Error::NotFound {
                message: format!("Profile `{}` does not exist!", id),
            }),
        }
    }

    async fn upsert_profile(&self, profile: &Profile) -> Result<Profile, Error> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "INSERT INTO profiles
                (id, email, full_name, role, phone, address, avatar_url, preferences,
                 last_sign_in_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (id) DO UPDATE SET
                email = EXCLUDED.email,
                full_name = EXCLUDED.full_name,
                role = EXCLUDED.role,
                preferences = EXCLUDED.preferences,
                last_sign_in_at = EXCLUDED.last_sign_in_at,
                updated_at = EXCLUDED.updated_at
             RETURNING *",
        )
        .bind(profile.id)
        .bind(&profile.email)
        .bind(&profile.full_name)
        .bind(profile.role.as_str())
        .bind(&profile.phone)
        .bind(&profile.address)
        .bind(&profile.avatar_url)
        .bind(profile.preferences.clone().map(Json))
        .bind(profile.last_sign_in_at)
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .fetch_one(&self.pg)
        .await?;
        Ok(row.into())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        update: ProfileUpdate,
        at: DateTime<Utc>,
    ) -> Result<Profile, Error> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "UPDATE profiles SET
                full_name = COALESCE($2, full_name),
                phone = COALESCE($3, phone),
                address = COALESCE($4, address),
                avatar_url = COALESCE($5, avatar_url),
                preferences = COALESCE($6, preferences),
                updated_at = $7
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(update.full_name)
        .bind(update.phone)
        .bind(update.address)
        .bind(update.avatar_url)
        .bind(update.preferences.map(Json))
        .bind(at)
        .fetch_optional(&self.pg)
        .await?;
        row.map(Profile::from).ok_or_else(|| Error::NotFound {
            message: format!("Profile `{}` does not exist!", id),
        })
    }

    async fn record_sign_in(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), Error> {
        sqlx::query("UPDATE profiles SET last_sign_in_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pg)
            .await?;
        Ok(())
    }

    async fn list_doctors(&self, name_filter: Option<&str>) -> Result<Vec<Profile>, Error> {
        let rows = sqlx::query_as::<_, ProfileRow>(
            "SELECT * FROM profiles
             WHERE role = 'doctor'
               AND ($1::text IS NULL OR full_name ILIKE '%' || $1 || '%')
             ORDER BY full_name",
        )
        .bind(name_filter)
        .fetch_all(&self.pg)
        .await?;
        Ok(rows.into_iter().map(Profile::from).collect())
    }
}

#[async_trait]
impl AppointmentStore for PgStore {
    async fn insert_appointment(&self, new: NewAppointment) -> Result<Appointment, Error> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, AppointmentRow>(
            "INSERT INTO appointments
                (id, patient_id, doctor_id, appointment_date, status, notes, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(new.patient_id)
        .bind(new.doctor_id)
        .bind(new.appointment_date)
        .bind(AppointmentStatus::Scheduled.as_str())
        .bind(new.notes)
        .bind(now)
        .fetch_one(&self.pg)
        .await?;
        appointment(row)
    }

    async fn fetch_appointment(&self, id: Uuid) -> Result<Appointment, Error> {
        let row = sqlx::query_as::<_, AppointmentRow>(
            "SELECT * FROM appointments WHERE id = $1 LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&self.pg)
        .await?;
        match row {
            Some(row) => appointment(row),
            None => Err(Error::NotFound {
                message: format!("Appointment `{}` does not exist!", id),
            }),
        }
    }

    async fn list_appointments(&self, scope: AppointmentScope) -> Result<Vec<Appointment>, Error> {
        let query = match scope {
            AppointmentScope::Patient(id) => sqlx::query_as::<_, AppointmentRow>(
                "SELECT * FROM appointments WHERE patient_id = $1 ORDER BY appointment_date",
            )
            .bind(id),
            AppointmentScope::Doctor(id) => sqlx::query_as::<_, AppointmentRow>(
                "SELECT * FROM appointments WHERE doctor_id = $1 ORDER BY appointment_date",
            )
            .bind(id),
            AppointmentScope::All => sqlx::query_as::<_, AppointmentRow>(
                "SELECT * FROM appointments ORDER BY appointment_date",
            ),
        };
        query
            .fetch_all(&self.pg)
            .await?
            .into_iter()
            .map(appointment)
            .collect()
    }

    async fn update_appointment(
        &self,
        id: Uuid,
        update: AppointmentUpdate,
        at: DateTime<Utc>,
    ) -> Result<Appointment, Error> {
        let row = sqlx::query_as::<_, AppointmentRow>(
            "UPDATE appointments SET
                status = COALESCE($2, status),
                notes = COALESCE($3, notes),
                appointment_date = COALESCE($4, appointment_date),
                updated_at = $5
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.notes)
        .bind(update.appointment_date)
        .bind(at)
        .fetch_optional(&self.pg)
        .await?;
        match row {
            Some(row) => appointment(row),
            None => Err(Error::NotFound {
                message: format!("Appointment `{}` does not exist!", id),
            }),
        }
    }
}

#[cfg(test)]
pub mod memory {
    //! In-process stand-in for the hosted tables.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemoryStore {
        profiles: Mutex<HashMap<Uuid, Profile>>,
        appointments: Mutex<Vec<Appointment>>,
        pub fail_reads: std::sync::atomic::AtomicBool,
    }

    impl MemoryStore {
        pub fn with_profiles(profiles: impl IntoIterator<Item = Profile>) -> Self {
            let store = Self::default();
            {
                let mut map = store.profiles.lock().unwrap();
                for p in profiles {
                    map.insert(p.id, p);
                }
            }
            store
        }

        pub fn profile(&self, id: Uuid) -> Option<Profile> {
            self.profiles.lock().unwrap().get(&id).cloned()
        }

        fn check(&self) -> Result<(), Error> {
            if self.fail_reads.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(Error::InternalError {
                    kind: "DatabaseError",
                    message: "connection reset".to_string(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ProfileStore for MemoryStore {
        async fn fetch_profile(&self, id: Uuid) -> Result<Profile, Error> {
            self.check()?;
            self.profile(id).ok_or_else(|| Error::NotFound {
                message: format!("Profile `{}` does not exist!", id),
            })
        }

        async fn upsert_profile(&self, profile: &Profile) -> Result<Profile, Error> {
            self.profiles
                .lock()
                .unwrap()
                .insert(profile.id, profile.clone());
            Ok(profile.clone())
        }

        async fn update_profile(
            &self,
            id: Uuid,
            update: ProfileUpdate,
            at: DateTime<Utc>,
        ) -> Result<Profile, Error> {
            let mut map = self.profiles.lock().unwrap();
            let profile = map.get_mut(&id).ok_or_else(|| Error::NotFound {
                message: format!("Profile `{}` does not exist!", id),
            })?;
            update.apply(profile, at);
            Ok(profile.clone())
        }

        async fn record_sign_in(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), Error> {
            if let Some(p) = self.profiles.lock().unwrap().get_mut(&id) {
                p.last_sign_in_at = Some(at);
            }
            Ok(())
        }

        async fn list_doctors(&self, name_filter: Option<&str>) -> Result<Vec<Profile>, Error> {
            self.check()?;
            let needle = name_filter.map(str::to_lowercase);
            let mut doctors: Vec<Profile> = self
                .profiles
                .lock()
                .unwrap()
                .values()
                .filter(|p| p.role == Role::Doctor)
                .filter(|p| match (&needle, &p.full_name) {
                    (None, _) => true,
                    (Some(n), Some(name)) => name.to_lowercase().contains(n),
                    (Some(_), None) => false,
                })
                .cloned()
                .collect();
            doctors.sort_by(|a, b| a.full_name.cmp(&b.full_name));
            Ok(doctors)
        }
    }

    #[async_trait]
    impl AppointmentStore for MemoryStore {
        async fn insert_appointment(&self, new: NewAppointment) -> Result<Appointment, Error> {
            let now = Utc::now();
            let appointment = Appointment {
                id: Uuid::new_v4(),
                patient_id: new.patient_id,
                doctor_id: new.doctor_id,
                appointment_date: new.appointment_date,
                status: AppointmentStatus::Scheduled,
                notes: new.notes,
                created_at: now,
                updated_at: now,
            };
            self.appointments.lock().unwrap().push(appointment.clone());
            Ok(appointment)
        }

        async fn fetch_appointment(&self, id: Uuid) -> Result<Appointment, Error> {
            self.appointments
                .lock()
                .unwrap()
                .iter()
                .find(|a| a.id == id)
                .cloned()
                .ok_or_else(|| Error::NotFound {
                    message: format!("Appointment `{}` does not exist!", id),
                })
        }

        async fn list_appointments(
            &self,
            scope: AppointmentScope,
        ) -> Result<Vec<Appointment>, Error> {
            let mut found: Vec<Appointment> = self
                .appointments
                .lock()
                .unwrap()
                .iter()
                .filter(|a| match scope {
                    AppointmentScope::Patient(id) => a.patient_id == id,
                    AppointmentScope::Doctor(id) => a.doctor_id == id,
                    AppointmentScope::All => true,
                })
                .cloned()
                .collect();
            found.sort_by_key(|a| a.appointment_date);
            Ok(found)
        }

        async fn update_appointment(
            &self,
            id: Uuid,
            update: AppointmentUpdate,
            at: DateTime<Utc>,
        ) -> Result<Appointment, Error> {
            let mut all = self.appointments.lock().unwrap();
            let appointment = all
                .iter_mut()
                .find(|a| a.id == id)
                .ok_or_else(|| Error::NotFound {
                    message: format!("Appointment `{}` does not exist!", id),
                })?;
            if let Some(status) = update.status {
                appointment.status = status;
            }
            if let Some(notes) = update.notes {
                appointment.notes = Some(notes);
            }
            if let Some(date) = update.appointment_date {
                appointment.appointment_date = date;
            }
            appointment.updated_at = at;
            Ok(appointment.clone())
        }
    }
}
