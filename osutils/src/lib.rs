pub mod dd;
pub mod dependencies;
pub mod files;
pub mod findmnt;
pub mod lsblk;
pub mod lsof;
pub mod mkfs;
pub mod mount;
pub mod path;
pub mod sgdisk;
pub mod tabfile;
pub mod udevadm;
pub mod wipefs;
pub mod zfs;
pub mod zpool;
