#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

fn main() {
    studygrid_tauri::run();
}
