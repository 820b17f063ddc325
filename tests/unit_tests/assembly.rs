mod assembler;
mod local;
