pub mod dbaccess;
