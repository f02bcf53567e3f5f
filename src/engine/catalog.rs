use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

fn validate_name(name: &str, what: &'static str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation(format!("{what} is required")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

fn validate_room_type(rt: &RoomType) -> Result<(), EngineError> {
    validate_name(&rt.name, "room type name")?;
    if rt.price > MAX_PRICE {
        return Err(EngineError::LimitExceeded("price too large"));
    }
    if !(MIN_ADULTS..=MAX_ADULTS).contains(&rt.max_adults) {
        return Err(EngineError::Validation(format!(
            "max_adults must be between {MIN_ADULTS} and {MAX_ADULTS}"
        )));
    }
    if rt.max_children > MAX_CHILDREN {
        return Err(EngineError::Validation(format!(
            "max_children must be at most {MAX_CHILDREN}"
        )));
    }
    Ok(())
}

impl Engine {
    pub async fn register_user(&self, id: Ulid, name: String) -> Result<(), EngineError> {
        validate_name(&name, "user name")?;
        if self.users.len() >= MAX_USERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many users"));
        }

        let _gate = self.enter().await?;
        let _catalog = self.catalog_lock.lock().await;
        if self.users.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let event = Event::UserRegistered { id, name };
        self.wal_append(&event).await?;
        self.apply_catalog(&event);
        Ok(())
    }

    pub async fn create_room_type(&self, room_type: RoomType) -> Result<(), EngineError> {
        validate_room_type(&room_type)?;
        if self.room_types.len() >= MAX_ROOM_TYPES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many room types"));
        }

        let _gate = self.enter().await?;
        let _catalog = self.catalog_lock.lock().await;
        if self.room_types.contains_key(&room_type.id) {
            return Err(EngineError::AlreadyExists(room_type.id));
        }
        let id = room_type.id;
        let event = Event::RoomTypeSaved { room_type };
        self.wal_append(&event).await?;
        self.apply_catalog(&event);
        tracing::info!("room type {id} created");
        Ok(())
    }

    pub async fn update_room_type(
        &self,
        id: Ulid,
        patch: RoomTypePatch,
    ) -> Result<RoomType, EngineError> {
        if patch.is_empty() {
            return Err(EngineError::Validation("no fields to update".into()));
        }

        let _gate = self.enter().await?;
        let _catalog = self.catalog_lock.lock().await;
        let mut room_type = self.get_room_type(&id).ok_or(EngineError::NotFound(id))?;
        patch.apply(&mut room_type);
        validate_room_type(&room_type)?;

        let event = Event::RoomTypeSaved {
            room_type: room_type.clone(),
        };
        self.wal_append(&event).await?;
        self.apply_catalog(&event);
        Ok(room_type)
    }

    pub async fn create_room(
        &self,
        id: Ulid,
        room_type_id: Ulid,
        number: String,
        active: bool,
    ) -> Result<(), EngineError> {
        if number.trim().is_empty() {
            return Err(EngineError::Validation("room number is required".into()));
        }
        if number.len() > MAX_ROOM_NUMBER_LEN {
            return Err(EngineError::LimitExceeded("room number too long"));
        }
        if self.rooms.len() >= MAX_ROOMS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }

        let _gate = self.enter().await?;
        let _catalog = self.catalog_lock.lock().await;
        if self.rooms.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if !self.room_types.contains_key(&room_type_id) {
            return Err(EngineError::NotFound(room_type_id));
        }
        if self.room_numbers.contains_key(&number) {
            return Err(EngineError::DuplicateRoomNumber(number));
        }

        let event = Event::RoomCreated {
            id,
            room_type_id,
            number,
            active,
        };
        self.wal_append(&event).await?;
        self.apply_catalog(&event);
        tracing::info!("room {id} created");
        Ok(())
    }

    /// Deactivating a room hides it from availability and new assignments.
    /// Bookings already bound to it stay bound.
    pub async fn set_room_active(&self, id: Ulid, active: bool) -> Result<(), EngineError> {
        let _gate = self.enter().await?;
        let mut rooms = self.write_rooms([id]).await?;
        let rs = rooms.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        if rs.active == active {
            return Ok(());
        }
        let event = Event::RoomActiveSet { id, active };
        self.wal_append(&event).await?;
        rs.active = active;
        tracing::info!("room {} {}", rs.number, if active { "activated" } else { "deactivated" });
        Ok(())
    }

    /// Refused while any booking, in any status, references the room.
    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.enter().await?;
        let _catalog = self.catalog_lock.lock().await;
        let rooms = self.write_rooms([id]).await?;
        let rs = rooms.get(&id).ok_or(EngineError::NotFound(id))?;
        if !rs.bookings.is_empty() {
            return Err(EngineError::RoomInUse(id));
        }
        let event = Event::RoomDeleted { id };
        self.wal_append(&event).await?;
        self.forget_room(rs);
        tracing::info!("room {} deleted", rs.number);
        Ok(())
    }

    /// Adding an image flagged as thumbnail clears the type's previous thumbnail.
    pub async fn add_room_image(&self, image: RoomImage) -> Result<(), EngineError> {
        if image.path.trim().is_empty() {
            return Err(EngineError::Validation("image path is required".into()));
        }
        if image.path.len() > MAX_PATH_LEN {
            return Err(EngineError::LimitExceeded("image path too long"));
        }
        if self.images.len() >= MAX_IMAGES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many images"));
        }

        let _gate = self.enter().await?;
        let _catalog = self.catalog_lock.lock().await;
        if self.images.contains_key(&image.id) {
            return Err(EngineError::AlreadyExists(image.id));
        }
        if !self.room_types.contains_key(&image.room_type_id) {
            return Err(EngineError::NotFound(image.room_type_id));
        }
        let event = Event::ImageAdded { image };
        self.wal_append(&event).await?;
        self.apply_catalog(&event);
        Ok(())
    }

    /// Make one image the only thumbnail of its room type.
    pub async fn set_thumbnail(&self, image_id: Ulid) -> Result<(), EngineError> {
        let _gate = self.enter().await?;
        let _catalog = self.catalog_lock.lock().await;
        let room_type_id = self
            .images
            .get(&image_id)
            .map(|img| img.room_type_id)
            .ok_or(EngineError::NotFound(image_id))?;
        let event = Event::ThumbnailSet {
            id: image_id,
            room_type_id,
        };
        self.wal_append(&event).await?;
        self.apply_catalog(&event);
        Ok(())
    }
}
