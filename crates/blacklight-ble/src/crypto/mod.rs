pub mod aes_gcm;
pub mod iv_ledger;
pub mod mgf1;
pub mod oaep;
pub mod rsa;
