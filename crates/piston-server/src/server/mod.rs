pub mod detect;
pub mod installation;
pub mod installer;
pub mod modpack;
pub mod supervisor;
