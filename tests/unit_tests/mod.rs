mod assembly;
mod comm;
mod field;
mod mesh;
