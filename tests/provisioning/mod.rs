mod clients;
mod runner;
