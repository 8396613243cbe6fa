use crate::error::ReplicaLockError;

pub fn get_exit_code(error: &ReplicaLockError) -> i32 {
    if error.is_configuration() {
        return 2;
    }

    match error {
        ReplicaLockError::InvalidHolderToken(_) => 2,

        ReplicaLockError::NotAcquired { .. } => 3,

        ReplicaLockError::Redis(_)
        | ReplicaLockError::Store { .. }
        | ReplicaLockError::Release { .. } => 20,

        ReplicaLockError::Protocol { .. } => 21,

        _ => 1,
    }
}
